use clap::Parser;
use color_eyre::Result;
use log::debug;
use medtime::{Config, Database, Profile, cli::{Cli, Commands}};
use std::path::PathBuf;

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let profile = if cli.dev { Profile::Dev } else { Profile::Prod };

    let config = match &cli.config {
        Some(path) => Config::load_from_path(&PathBuf::from(path), profile)?,
        None => Config::load_with_profile(profile)?,
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();
    debug!("Using profile {:?}", profile);

    let db_path = config.get_database_path();
    let db = Database::new(
        db_path
            .to_str()
            .ok_or_else(|| color_eyre::eyre::eyre!("Database path contains invalid UTF-8"))?,
    )?;

    match cli.command.unwrap_or(Commands::Schedules) {
        Commands::AddMedication { name, dosage, notes } => {
            medtime::cli::handle_add_medication(name, dosage, notes, &db)?;
        }
        Commands::Medications => medtime::cli::handle_list_medications(&db)?,
        Commands::RemoveMedication { id } => medtime::cli::handle_remove_medication(id, &db)?,
        Commands::AddSchedule { medication_id, time } => {
            medtime::cli::handle_add_schedule(medication_id, time, &db, &config)?;
        }
        Commands::EditSchedule { id, time } => {
            medtime::cli::handle_edit_schedule(id, time, &db, &config)?;
        }
        Commands::RemoveSchedule { id } => medtime::cli::handle_remove_schedule(id, &db, &config)?,
        Commands::Schedules => medtime::cli::handle_list_schedules(&db)?,
        Commands::Reschedule => medtime::cli::handle_reschedule(&db, &config)?,
        Commands::Pending => medtime::cli::handle_pending(&db, &config)?,
        Commands::Watch { once } => medtime::cli::handle_watch(once, &db, &config)?,
        Commands::Mark { schedule_id, status } => {
            medtime::cli::handle_mark(schedule_id, status, &db)?;
        }
        Commands::History => medtime::cli::handle_history(&db)?,
        Commands::Reset { yes } => medtime::cli::handle_reset(yes, &db)?,
    }

    Ok(())
}
