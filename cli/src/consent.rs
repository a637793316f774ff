//! Terminal consent prompts. This layer is the human in the loop: nothing
//! the planner produced executes without passing through here first.

use std::io::IsTerminal;
use std::io::Write;

use ganesha_core::Action;
use owo_colors::OwoColorize;

pub enum ConsentDecision {
    /// Ids of the approved actions, in plan order.
    Approved(Vec<String>),
    Cancelled,
}

/// Review a list of candidate actions. `auto` approves everything except
/// high-risk actions when `prompt_high_risk` is set; interactive review
/// offers y(es) / n(o, skip) / a(ll remaining) / q(uit).
pub fn review_actions(
    actions: &[Action],
    auto: bool,
    prompt_high_risk: bool,
) -> std::io::Result<ConsentDecision> {
    let mut approved = Vec::new();
    let mut approve_rest = false;

    let interactive = std::io::stdin().is_terminal();
    if !interactive && !auto {
        eprintln!("stdin is not a terminal; re-run with --auto to approve non-interactively");
        return Ok(ConsentDecision::Cancelled);
    }

    let total = actions.len();
    for (index, action) in actions.iter().enumerate() {
        let needs_prompt = if auto || approve_rest {
            prompt_high_risk && action.risk_level.is_high_or_critical()
        } else {
            true
        };

        if !needs_prompt {
            approved.push(action.id.clone());
            continue;
        }

        if !interactive {
            // Cannot prompt for this high-risk action; skip it rather than
            // run it silently.
            eprintln!(
                "skipping high-risk action without a terminal: {}",
                action.command
            );
            continue;
        }

        print_action(index + 1, total, action);
        loop {
            print!("{} ", "approve? [y/n/a/q]".bold());
            std::io::stdout().flush()?;
            let mut line = String::new();
            std::io::stdin().read_line(&mut line)?;
            match line.trim().to_lowercase().as_str() {
                "y" | "yes" => {
                    approved.push(action.id.clone());
                    break;
                }
                "n" | "no" => break,
                "a" | "all" => {
                    approved.push(action.id.clone());
                    approve_rest = true;
                    break;
                }
                "q" | "quit" => return Ok(ConsentDecision::Cancelled),
                _ => continue,
            }
        }
    }

    Ok(ConsentDecision::Approved(approved))
}

fn print_action(index: usize, total: usize, action: &Action) {
    let risk = action.risk_level.to_string().to_uppercase();
    let risk_tag = match action.risk_level {
        ganesha_protocol::RiskLevel::High | ganesha_protocol::RiskLevel::Critical => {
            format!("{}", risk.red().bold())
        }
        ganesha_protocol::RiskLevel::Medium => format!("{}", risk.yellow()),
        _ => format!("{}", risk.green()),
    };
    println!("\n[{index}/{total}] [{risk_tag}]");
    println!("  {} {}", "command:".bold(), action.command);
    if !action.explanation.is_empty() {
        println!("  {} {}", "why:".dimmed(), action.explanation);
    }
    if let Some(rollback) = &action.rollback_command {
        println!("  {} {rollback}", "undo:".dimmed());
    }
}
