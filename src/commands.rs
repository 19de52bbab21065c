//! Command execution.

use crate::config::Config;
use crate::Commands;
use chrono::DateTime;
use colored::Colorize;
use permfsm_core::{
    Account, EntityMetadata, MachineDefinition, State, StateMachine, TransitionRecord,
};
use permfsm_journal::{verify_journal, Journal, JournalConfig};
use std::error::Error;
use std::path::Path;
use std::sync::Arc;

/// Executes a command and returns the formatted output.
pub fn execute(
    cmd: Commands,
    config: &Config,
    caller: Option<Account>,
) -> Result<String, Box<dyn Error>> {
    match cmd {
        Commands::Init {
            definition,
            entity_id,
            content_hash,
            base_uri,
        } => {
            let owner = acting(caller)?;
            let mut def = match definition {
                Some(path) => load_definition(&path)?,
                None => MachineDefinition::generic(),
            };
            if let Some(entity_id) = entity_id {
                def.metadata = Some(EntityMetadata::new(entity_id, content_hash, base_uri));
            }

            let machine = StateMachine::create(owner, &def, open_journal(config)?)?;
            Ok(format!(
                "{} machine in {} (owner: {}, initial: {}, checksum: {})",
                "Created".green(),
                config.storage.data_dir.display(),
                owner,
                machine.get_current_state().to_string().cyan(),
                machine.checksum()
            ))
        }

        Commands::Show => {
            let machine = open_machine(config)?;
            let next = machine
                .get_next_states()
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>();

            let mut output = format!(
                "{}: {}\n",
                "Current state".bold(),
                machine.get_current_state().to_string().cyan()
            );
            output.push_str(&format!("Next states: {}\n", join_or_none(&next)));
            output.push_str(&format!("Owner: {}\n", machine.owner()));
            output.push_str(&format!("States: {}\n", machine.graph().len()));
            output.push_str(&format!("Transitions: {}\n", machine.get_history_length()));
            output.push_str(&format!("Checksum: {}", machine.checksum()));
            Ok(output)
        }

        Commands::States => {
            let machine = open_machine(config)?;
            let current = machine.get_current_state();
            let output = machine
                .graph()
                .iter()
                .map(|state| {
                    let marker = if state.name == current { "*" } else { " " };
                    format!("{} {}", marker, format_state(state))
                })
                .collect::<Vec<_>>()
                .join("\n");
            Ok(output)
        }

        Commands::State { state } => {
            let machine = open_machine(config)?;
            Ok(format_state(machine.get_state(state)?))
        }

        Commands::Transition { to_state, role } => {
            let actor = acting(caller)?;
            let mut machine = open_machine(config)?;
            let record = machine.transition_state(actor, to_state, role)?;
            Ok(format!(
                "{} {} -> {} (history length: {})",
                "Transitioned".green(),
                record.from_state,
                record.to_state.to_string().cyan(),
                machine.get_history_length()
            ))
        }

        Commands::Grant { role, account } => {
            let sender = acting(caller)?;
            let mut machine = open_machine(config)?;
            let role = machine.grant_role_to_account(sender, &role, account)?;
            Ok(format!(
                "{} {} to {}",
                "Granted".green(),
                role.to_string().cyan(),
                account
            ))
        }

        Commands::Revoke { role, account } => {
            let sender = acting(caller)?;
            let mut machine = open_machine(config)?;
            machine.revoke_role(sender, role, account)?;
            Ok(format!(
                "{} {} from {}",
                "Revoked".green(),
                role.to_string().cyan(),
                account
            ))
        }

        Commands::Renounce { role } => {
            let account = acting(caller)?;
            let mut machine = open_machine(config)?;
            machine.renounce_role(account, role, account)?;
            Ok(format!("{} {}", "Renounced".green(), role.to_string().cyan()))
        }

        Commands::HasRole { role, account } => {
            let machine = open_machine(config)?;
            Ok(yes_no(machine.has_role(role, account)))
        }

        Commands::CheckRole { role } => {
            let machine = open_machine(config)?;
            Ok(yes_no(machine.check_allowed_roles(role)))
        }

        Commands::AddState { state } => {
            let sender = acting(caller)?;
            let mut machine = open_machine(config)?;
            machine.add_state(sender, state)?;
            Ok(format!("{} state {}", "Added".green(), state.to_string().cyan()))
        }

        Commands::AddNext { state, next_state } => {
            let sender = acting(caller)?;
            let mut machine = open_machine(config)?;
            machine.add_next_state_for_state(sender, state, next_state)?;
            Ok(format!(
                "{} edge {} -> {}",
                "Added".green(),
                state,
                next_state.to_string().cyan()
            ))
        }

        Commands::AddFunction { state, selector } => {
            let sender = acting(caller)?;
            let mut machine = open_machine(config)?;
            machine.add_allowed_function_for_state(sender, state, selector)?;
            Ok(format!(
                "{} {} in {}",
                "Allowed".green(),
                selector,
                state.to_string().cyan()
            ))
        }

        Commands::SetPre { state, selector } => {
            let sender = acting(caller)?;
            let mut machine = open_machine(config)?;
            machine.set_pre_function(sender, state, selector)?;
            Ok(format!(
                "{} pre-function of {} to {}",
                "Set".green(),
                state.to_string().cyan(),
                selector
            ))
        }

        Commands::AddRole {
            state,
            role,
            account,
        } => {
            let sender = acting(caller)?;
            let mut machine = open_machine(config)?;
            machine.add_role_for_state(sender, state, role, account)?;
            Ok(format!(
                "{} {} in {} and granted it to {}",
                "Allowed".green(),
                role.to_string().cyan(),
                state,
                account
            ))
        }

        Commands::History { index, json } => {
            let machine = open_machine(config)?;
            let records: Vec<(u64, TransitionRecord)> = match index {
                Some(i) => vec![(i, machine.get_history(i)?)],
                None => machine
                    .history()
                    .iter()
                    .copied()
                    .enumerate()
                    .map(|(i, r)| (i as u64, r))
                    .collect(),
            };

            if json {
                let values: Vec<_> = records.iter().map(|(_, r)| r).collect();
                return Ok(serde_json::to_string_pretty(&values)?);
            }
            if records.is_empty() {
                return Ok("No transitions yet".yellow().to_string());
            }

            let output = records
                .iter()
                .map(|(i, r)| format_record(*i, r))
                .collect::<Vec<_>>()
                .join("\n");
            Ok(output)
        }

        Commands::Verify => {
            let result = verify_journal(&config.storage.data_dir)?;
            let mut output = format!(
                "Records: {}\nLast sequence: {}\n",
                result.valid_records, result.max_sequence
            );
            if result.is_clean() {
                output.push_str(&"Journal OK".green().to_string());
            } else {
                output.push_str(
                    &format!(
                        "Torn tail: {} bytes (dropped on next open)",
                        result.bytes_truncated
                    )
                    .yellow()
                    .to_string(),
                );
            }
            Ok(output)
        }

        Commands::Uri { entity_id } => {
            let machine = open_machine(config)?;
            Ok(machine.entity_uri(entity_id)?)
        }

        Commands::Supports { interface_id } => {
            let machine = open_machine(config)?;
            Ok(yes_no(machine.supports_interface(interface_id)))
        }
    }
}

fn acting(caller: Option<Account>) -> Result<Account, Box<dyn Error>> {
    caller.ok_or_else(|| "no acting account: pass --as or set PERMFSM_ACCOUNT".into())
}

fn open_journal(config: &Config) -> Result<Arc<Journal>, Box<dyn Error>> {
    let journal_config = JournalConfig::new(&config.storage.data_dir)
        .with_fsync_policy(config.storage.fsync_policy.into());
    Ok(Arc::new(Journal::open(journal_config)?))
}

fn open_machine(config: &Config) -> Result<StateMachine, Box<dyn Error>> {
    let journal = open_journal(config)?;
    if journal.is_empty() {
        return Err(format!(
            "no machine in {}: run init first",
            config.storage.data_dir.display()
        )
        .into());
    }
    Ok(StateMachine::open(journal)?)
}

/// Reads a definition from YAML or JSON, chosen by file extension.
fn load_definition(path: &Path) -> Result<MachineDefinition, Box<dyn Error>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    let def: MachineDefinition = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&content)?,
        _ => serde_yaml::from_str(&content)?,
    };
    def.validate()?;
    Ok(def)
}

fn format_state(state: &State) -> String {
    let next = state
        .next_states
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>();
    let roles = state
        .allowed_roles
        .iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>();
    let functions = state
        .allowed_functions
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>();

    let mut output = format!(
        "{} -> [{}] roles: [{}]",
        state.name.to_string().bold(),
        next.join(", "),
        roles.join(", ")
    );
    if !functions.is_empty() {
        output.push_str(&format!(" functions: [{}]", functions.join(", ")));
    }
    if let Some(pre) = state.pre_function {
        output.push_str(&format!(" pre: {}", pre));
    }
    output
}

fn format_record(index: u64, record: &TransitionRecord) -> String {
    let when = DateTime::from_timestamp(record.timestamp as i64, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| record.timestamp.to_string());
    format!(
        "#{} {} -> {} by {} as {} at {}",
        index,
        record.from_state,
        record.to_state.to_string().cyan(),
        record.actor,
        record.role,
        when.dimmed()
    )
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.join(", ")
    }
}

fn yes_no(value: bool) -> String {
    if value {
        "yes".green().to_string()
    } else {
        "no".red().to_string()
    }
}
