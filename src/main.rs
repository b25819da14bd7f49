use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{Duration as ChronoDuration, Local};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use archmaster::aur::AurClient;
use archmaster::config::AppConfig;
use archmaster::db::Database;
use archmaster::inventory::{self, Inventory, SystemDb};
use archmaster::models::{format_size, AnnotatedPackage, DeleteOutcome, Package};
use archmaster::privileged::{PrivilegedRunner, RunOutcome, RunnerConfig, RunnerEvent};
use archmaster::profiles::ProfileManager;
use archmaster::{commands, pacman_conf, updates};

const MAX_PASSWORD_ATTEMPTS: usize = 3;

#[derive(Parser)]
#[command(name = "archmaster")]
#[command(about = "Inspect, annotate and maintain the packages installed on an Arch Linux system")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List installed packages
    List {
        #[arg(long, value_enum, default_value = "all")]
        filter: ListFilter,

        /// Show notes, tags and keep/review flags
        #[arg(short, long)]
        annotated: bool,
    },
    /// Show one package in detail
    Info { name: String },
    /// Search installed package names and descriptions
    Search { query: String },
    /// Show what a package depends on
    Deps {
        name: String,
        #[arg(short, long, default_value = "1")]
        depth: usize,
    },
    /// Show what depends on a package
    Rdeps {
        name: String,
        #[arg(short, long, default_value = "1")]
        depth: usize,
    },
    /// Find the package that owns a file
    Owns { path: String },
    /// List the files a package owns
    Files { name: String },
    /// Summary counts and the largest packages
    Stats {
        #[arg(long, default_value = "10")]
        top: usize,
    },
    /// Show or set a package's note
    Note {
        name: String,
        /// New note text. An empty string clears the note.
        text: Option<String>,
    },
    /// Show, add or remove a package's tags
    Tag {
        name: String,
        tags: Vec<String>,
        #[arg(short, long)]
        remove: bool,
    },
    /// Mark a package as one to keep
    Keep {
        name: String,
        #[arg(long)]
        off: bool,
    },
    /// Mark a package for later review
    Review {
        name: String,
        #[arg(long)]
        off: bool,
    },
    /// List stored annotations
    Annotations {
        /// Only packages carrying this tag
        #[arg(long)]
        tag: Option<String>,
    },
    /// Write all annotations to a JSON file
    Export { path: PathBuf },
    /// Merge annotations from a JSON file
    Import { path: PathBuf },
    #[command(subcommand)]
    Profile(ProfileCommand),
    #[command(subcommand)]
    Aur(AurCommand),
    /// Show pending updates, or recent upgrades from the pacman log
    Updates {
        /// Show upgrades from the last N days instead
        #[arg(long)]
        recent: Option<i64>,
    },
    #[command(subcommand)]
    Pins(PinCommand),
    /// Run a maintenance action as root
    Run(RunArgs),
    /// Print the effective configuration
    Config {
        /// Write it to the user config file
        #[arg(long)]
        save: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ListFilter {
    All,
    Explicit,
    Deps,
    Orphans,
}

#[derive(Subcommand)]
enum ProfileCommand {
    /// List visible profiles
    List,
    /// Show a profile and which of its packages are missing
    Show { name: String },
    /// Save the explicitly installed packages as a profile
    SaveInstalled {
        #[arg(long)]
        name: Option<String>,
    },
    Delete { name: String },
    /// Bring back a deleted built-in profile
    Restore { name: String },
    Export { name: String, path: PathBuf },
    Import { path: PathBuf },
    /// Install the packages of a profile that are not installed yet
    Install { name: String },
}

#[derive(Subcommand)]
enum AurCommand {
    Search {
        query: String,
        #[arg(long, value_enum)]
        by: Option<AurSearchField>,
    },
    Info { names: Vec<String> },
    /// Packages without a maintainer
    Orphans,
    /// Compare installed versions with the AUR
    Updates,
}

#[derive(Clone, Copy, ValueEnum)]
enum AurSearchField {
    Name,
    Maintainer,
}

#[derive(Subcommand)]
enum PinCommand {
    /// Packages listed in IgnorePkg
    List,
    Add { name: String },
    Remove { name: String },
}

#[derive(Args)]
struct RunArgs {
    #[command(subcommand)]
    action: RunAction,

    /// Print the command instead of running it
    #[arg(long, global = true)]
    dry_run: bool,
}

#[derive(Subcommand)]
enum RunAction {
    Remove {
        names: Vec<String>,
        /// Also remove dependencies nothing else needs
        #[arg(long)]
        cascade: bool,
    },
    RemoveOrphans,
    Install { names: Vec<String> },
    Upgrade {
        /// Only these packages
        names: Vec<String>,
        /// Upgrade through an AUR helper if one is installed
        #[arg(long)]
        aur: bool,
    },
    Sync,
    CleanCache,
    PruneCache {
        #[arg(long, default_value = "3")]
        keep: u32,
    },
    RefreshKeyrings,
    Unlock,
    MergePacnew,
}

/// Initialize tracing. Logs go to stderr so stdout carries only command output.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "archmaster=info".into()),
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = AppConfig::load();

    match cli.command {
        Commands::List { filter, annotated } => {
            let inventory = open_inventory(&config)?;
            let packages = match filter {
                ListFilter::All => inventory.all_packages(),
                ListFilter::Explicit => inventory.explicit_packages(),
                ListFilter::Deps => inventory.dependency_packages(),
                ListFilter::Orphans => inventory.orphan_packages(),
            };
            if annotated {
                let db = open_database(&config)?;
                for entry in db.annotate(packages)? {
                    print_annotated(&entry);
                }
            } else {
                for package in &packages {
                    println!("{} {}", package.name, package.version);
                }
            }
        }
        Commands::Info { name } => {
            let inventory = open_inventory(&config)?;
            let package = inventory
                .package(&name)
                .with_context(|| format!("Package not found: {}", name))?;
            print_package(&package);

            let db = open_database(&config)?;
            let data = db.get_package_user_data(&name)?;
            if !data.is_empty() {
                println!();
                print_field("Note", &data.notes);
                print_field("Tags", &data.tags.join(", "));
                print_field("Keep", &data.marked_keep.to_string());
                print_field("Review", &data.marked_review.to_string());
            }
            db.mark_viewed(&name)?;
        }
        Commands::Search { query } => {
            let inventory = open_inventory(&config)?;
            for package in inventory.search(&query) {
                println!("{} {}\n    {}", package.name, package.version, package.description);
            }
        }
        Commands::Deps { name, depth } => {
            let inventory = open_inventory(&config)?;
            print_tree(&inventory.dependency_tree(&name, depth)?, &name);
        }
        Commands::Rdeps { name, depth } => {
            let inventory = open_inventory(&config)?;
            print_tree(&inventory.reverse_dependency_tree(&name, depth)?, &name);
        }
        Commands::Owns { path } => {
            let inventory = open_inventory(&config)?;
            match inventory.owner_of(&path)? {
                Some(owner) => println!("{} is owned by {}", path, owner),
                None => bail!("No package owns {}", path),
            }
        }
        Commands::Files { name } => {
            let inventory = open_inventory(&config)?;
            for file in inventory.files_of(&name)? {
                println!("{}", file);
            }
        }
        Commands::Stats { top } => stats(&config, top)?,
        Commands::Note { name, text } => {
            let db = open_database(&config)?;
            match text {
                Some(text) => db.set_package_notes(&name, &text)?,
                None => println!("{}", db.get_package_notes(&name)?),
            }
        }
        Commands::Tag { name, tags, remove } => {
            let db = open_database(&config)?;
            for tag in &tags {
                if remove {
                    db.remove_package_tag(&name, tag)?;
                } else {
                    db.add_package_tag(&name, tag)?;
                }
            }
            println!("{}", db.get_package_tags(&name)?.join(", "));
        }
        Commands::Keep { name, off } => open_database(&config)?.set_package_keep(&name, !off)?,
        Commands::Review { name, off } => open_database(&config)?.set_package_review(&name, !off)?,
        Commands::Annotations { tag } => {
            let db = open_database(&config)?;
            match tag {
                Some(tag) => {
                    for name in db.get_packages_with_tag(&tag)? {
                        println!("{}", name);
                    }
                }
                None => {
                    for data in db.get_all_user_data()? {
                        println!(
                            "{}{}{} [{}] {}",
                            data.package_name,
                            if data.marked_keep { " (keep)" } else { "" },
                            if data.marked_review { " (review)" } else { "" },
                            data.tags.join(", "),
                            data.notes
                        );
                    }
                }
            }
        }
        Commands::Export { path } => {
            let count = open_database(&config)?.export_to_json(&path)?;
            println!("Exported {} annotations to {}", count, path.display());
        }
        Commands::Import { path } => {
            let count = open_database(&config)?.import_from_json(&path)?;
            println!("Imported {} annotations from {}", count, path.display());
        }
        Commands::Profile(command) => profile(&config, command).await?,
        Commands::Aur(command) => aur(&config, command).await?,
        Commands::Updates { recent } => match recent {
            Some(days) => recent_upgrades(&config, days)?,
            None => pending_updates().await?,
        },
        Commands::Pins(command) => pins(&config, command).await?,
        Commands::Run(args) => run_action(&config, args).await?,
        Commands::Config { save } => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            if save {
                config.save()?;
            }
        }
    }

    Ok(())
}

fn open_inventory(config: &AppConfig) -> Result<Inventory<SystemDb>> {
    inventory::open_system(config).with_context(|| {
        format!(
            "Could not read the package database at {}",
            config.db_path.display()
        )
    })
}

fn open_database(config: &AppConfig) -> Result<Database> {
    let db = Database::open_default(config)?;
    db.migrate()?;
    Ok(db)
}

fn open_profiles(config: &AppConfig) -> Result<ProfileManager> {
    Ok(ProfileManager::open(config.data_dir()?)?)
}

// ============================================================
// Output
// ============================================================

fn print_field(label: &str, value: &str) {
    println!("{:<16}: {}", label, if value.is_empty() { "None" } else { value });
}

fn print_package(package: &Package) {
    print_field("Name", &package.name);
    print_field("Version", &package.version);
    print_field("Description", &package.description);
    print_field("URL", package.url.as_deref().unwrap_or_default());
    print_field("Licenses", &package.licenses.join("  "));
    print_field("Groups", &package.groups.join("  "));
    print_field("Provides", &package.provides.join("  "));
    print_field("Depends On", &package.depends.join("  "));
    print_field("Optional Deps", &package.optional_depends.join("\n                  "));
    print_field("Required By", &package.required_by.join("  "));
    print_field("Optional For", &package.optional_for.join("  "));
    print_field("Conflicts With", &package.conflicts.join("  "));
    print_field("Replaces", &package.replaces.join("  "));
    print_field("Installed Size", &package.formatted_size());
    print_field("Packager", package.packager.as_deref().unwrap_or_default());
    print_field(
        "Install Date",
        &package
            .install_date
            .map(|d| d.with_timezone(&Local).to_rfc2822())
            .unwrap_or_default(),
    );
    print_field("Install Reason", package.install_reason.as_str());
}

fn print_annotated(entry: &AnnotatedPackage) {
    let mut line = format!("{} {}", entry.package.name, entry.package.version);
    if entry.is_marked_keep() {
        line.push_str(" (keep)");
    }
    if entry.is_marked_review() {
        line.push_str(" (review)");
    }
    if let Some(data) = &entry.user_data {
        if !data.tags.is_empty() {
            line.push_str(&format!(" [{}]", data.tags.join(", ")));
        }
        if !data.notes.is_empty() {
            line.push_str(&format!(" - {}", data.notes));
        }
    }
    println!("{}", line);
}

fn print_tree(tree: &BTreeMap<String, Vec<String>>, root: &str) {
    fn visit(tree: &BTreeMap<String, Vec<String>>, name: &str, indent: usize, shown: &mut Vec<String>) {
        println!("{}{}", "  ".repeat(indent), name);
        if shown.iter().any(|s| s == name) {
            return;
        }
        shown.push(name.to_string());
        if let Some(children) = tree.get(name) {
            for child in children {
                visit(tree, child, indent + 1, shown);
            }
        }
    }
    visit(tree, root, 0, &mut Vec::new());
}

fn stats(config: &AppConfig, top: usize) -> Result<()> {
    // The annotation counts are still useful when pacman's database is unreadable
    match open_inventory(config) {
        Ok(inventory) => {
            println!("Installed:        {}", inventory.total_count());
            println!("Explicit:         {}", inventory.explicit_count());
            println!("Dependencies:     {}", inventory.dependency_count());
            println!("Orphans:          {}", inventory.orphan_count());
            println!(
                "Installed size:   {}",
                format_size(inventory.total_installed_size())
            );
            println!();
            for (name, size) in inventory.size_by_package().into_iter().take(top) {
                println!("{:>12}  {}", format_size(size), name);
            }
            println!();
        }
        Err(e) => eprintln!("{:#}", e),
    }

    let db = open_database(config)?;
    println!("With notes:       {}", db.count_packages_with_notes()?);
    println!("Marked keep:      {}", db.count_packages_marked_keep()?);
    println!("Marked review:    {}", db.count_packages_marked_review()?);
    println!("Tags:             {}", db.get_all_tags()?.join(", "));
    Ok(())
}

// ============================================================
// Profiles
// ============================================================

async fn profile(config: &AppConfig, command: ProfileCommand) -> Result<()> {
    let mut profiles = open_profiles(config)?;

    match command {
        ProfileCommand::List => {
            for profile in profiles.all_profiles() {
                let kind = if profile.built_in { "built-in" } else { "user" };
                println!(
                    "{} ({}, {} packages)\n    {}",
                    profile.name,
                    kind,
                    profile.packages.len(),
                    profile.description
                );
            }
        }
        ProfileCommand::Show { name } => {
            let profile = profiles
                .profile(&name)
                .with_context(|| format!("No profile named {}", name))?;
            println!("{}\n{}\n", profile.name, profile.description);
            let missing = match open_inventory(config) {
                Ok(inventory) => profiles.missing_packages(&profile, &inventory),
                Err(e) => {
                    eprintln!("{:#}", e);
                    Vec::new()
                }
            };
            for package in &profile.packages {
                let marker = if missing.contains(package) { "missing" } else { "" };
                println!("  {:<32} {}", package, marker);
            }
        }
        ProfileCommand::SaveInstalled { name } => {
            let inventory = open_inventory(config)?;
            let mut profile = profiles.create_from_installed(&inventory);
            if let Some(name) = name {
                profile.name = name;
            }
            println!("Saved {} with {} packages", profile.name, profile.packages.len());
            profiles.save_profile(profile)?;
        }
        ProfileCommand::Delete { name } => match profiles.delete_profile(&name)? {
            DeleteOutcome::RemovedUser => println!("Deleted {}", name),
            DeleteOutcome::Tombstoned => {
                println!("Hid built-in profile {} (restore with `profile restore`)", name)
            }
            DeleteOutcome::NotFound => bail!("No profile named {}", name),
        },
        ProfileCommand::Restore { name } => {
            if !profiles.restore_builtin(&name)? {
                bail!("{} is not a deleted built-in profile", name);
            }
            println!("Restored {}", name);
        }
        ProfileCommand::Export { name, path } => {
            profiles.export_profile(&name, &path)?;
            println!("Exported {} to {}", name, path.display());
        }
        ProfileCommand::Import { path } => {
            let profile = profiles.import_profile(&path)?;
            println!("Imported {} with {} packages", profile.name, profile.packages.len());
        }
        ProfileCommand::Install { name } => {
            let profile = profiles
                .profile(&name)
                .with_context(|| format!("No profile named {}", name))?;
            let inventory = open_inventory(config)?;
            let missing = profiles.missing_packages(&profile, &inventory);
            if missing.is_empty() {
                println!("Everything in {} is already installed", name);
                return Ok(());
            }
            let description = format!("Install {} packages from {}", missing.len(), name);
            run_interactive(config, commands::install_packages(&missing), &description).await?;
        }
    }
    Ok(())
}

// ============================================================
// AUR
// ============================================================

async fn aur(config: &AppConfig, command: AurCommand) -> Result<()> {
    let client = AurClient::from_config(config)?;

    let packages = match command {
        AurCommand::Search { query, by } => match by {
            None => client.search(&query).await?,
            Some(AurSearchField::Name) => client.search_by_name(&query).await?,
            Some(AurSearchField::Maintainer) => client.search_by_maintainer(&query).await?,
        },
        AurCommand::Info { names } => client.info(&names).await?,
        AurCommand::Orphans => client.orphans().await?,
        AurCommand::Updates => {
            let inventory = open_inventory(config)?;
            let installed = updates::foreign_versions(
                inventory.all_packages(),
                &foreign_packages(config).await?,
            );
            tracing::debug!("Checking {} foreign packages against the AUR", installed.len());
            for update in client.check_for_updates(&installed).await? {
                println!(
                    "{} {} -> {}",
                    update.name, update.current_version, update.new_version
                );
            }
            return Ok(());
        }
    };

    for package in packages {
        let flag = if package.is_out_of_date() { " (out of date)" } else { "" };
        println!(
            "aur/{} {} (+{} {:.2}){}\n    {}",
            package.name, package.version, package.num_votes, package.popularity, flag, package.description
        );
    }
    Ok(())
}

/// Installed packages that no sync database provides, as pacman reports them.
async fn foreign_packages(config: &AppConfig) -> Result<BTreeSet<String>> {
    let output = tokio::process::Command::new("pacman")
        .arg("-Qmq")
        .arg("--dbpath")
        .arg(&config.db_path)
        .output()
        .await
        .context("Failed to run pacman -Qmq")?;
    // pacman exits with 1 and prints nothing when there are no foreign packages
    if !output.status.success() && !output.stderr.is_empty() {
        bail!(
            "pacman -Qmq failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(updates::parse_package_names(&String::from_utf8_lossy(&output.stdout)))
}

// ============================================================
// Updates
// ============================================================

async fn pending_updates() -> Result<()> {
    let mut pending = Vec::new();

    // checkupdates exits with 2 when there is nothing to update
    let output = tokio::process::Command::new("checkupdates")
        .output()
        .await
        .context("Failed to run checkupdates (is pacman-contrib installed?)")?;
    pending.extend(updates::parse_updates_output(
        &String::from_utf8_lossy(&output.stdout),
        false,
    ));

    let path = std::env::var("PATH").unwrap_or_default();
    if let Some(helper) = commands::detect_aur_helper(&path) {
        match tokio::process::Command::new(helper).arg("-Qua").output().await {
            Ok(output) => pending.extend(updates::parse_updates_output(
                &String::from_utf8_lossy(&output.stdout),
                true,
            )),
            Err(e) => tracing::warn!("Failed to run {} -Qua: {}", helper, e),
        }
    }

    if pending.is_empty() {
        println!("System is up to date");
    }
    for update in &pending {
        let mut notes = Vec::new();
        if update.is_aur {
            notes.push("aur");
        }
        if update.is_major_update() {
            notes.push("major");
        }
        if update.is_security_update() {
            notes.push("security");
        }
        println!(
            "{} {} -> {} {}",
            update.name,
            update.current_version,
            update.new_version,
            if notes.is_empty() { String::new() } else { format!("[{}]", notes.join(", ")) }
        );
    }
    Ok(())
}

fn recent_upgrades(config: &AppConfig, days: i64) -> Result<()> {
    let log = std::fs::read_to_string(&config.pacman_log)
        .with_context(|| format!("Failed to read {}", config.pacman_log.display()))?;
    let since = (Local::now() - ChronoDuration::days(days)).naive_local();

    for entry in updates::recent_upgrades(&log, since) {
        println!(
            "{}  {} {} -> {}",
            entry.timestamp.format("%Y-%m-%d %H:%M"),
            entry.package,
            entry.old_version.unwrap_or_default(),
            entry.new_version.unwrap_or_default()
        );
    }
    Ok(())
}

// ============================================================
// Pins
// ============================================================

async fn pins(config: &AppConfig, command: PinCommand) -> Result<()> {
    let conf = std::fs::read_to_string(&config.pacman_conf)
        .with_context(|| format!("Failed to read {}", config.pacman_conf.display()))?;

    let updated = match command {
        PinCommand::List => {
            for name in pacman_conf::ignored_packages(&conf) {
                println!("{}", name);
            }
            return Ok(());
        }
        PinCommand::Add { name } => {
            if pacman_conf::is_pinned(&conf, &name) {
                println!("{} is already pinned", name);
                return Ok(());
            }
            pacman_conf::add_ignored(&conf, &name)
                .context("pacman.conf has no [options] section")?
        }
        PinCommand::Remove { name } => {
            if !pacman_conf::is_pinned(&conf, &name) {
                println!("{} is not pinned", name);
                return Ok(());
            }
            pacman_conf::remove_ignored(&conf, &name)
        }
    };

    let staged = pacman_conf::stage(&updated)?;
    let command = pacman_conf::write_command(staged.path(), &config.pacman_conf);
    let runner = PrivilegedRunner::new(command, "Update IgnorePkg", RunnerConfig::from(config));

    let mut lines = spawn_stdin_reader();
    let mut result = Err(anyhow::anyhow!("Too many incorrect password attempts"));
    for _ in 0..MAX_PASSWORD_ATTEMPTS {
        let password = read_password(&mut lines).await?;
        let outcome = runner
            .run_to_completion(&password, |text| {
                print!("{}", text);
                let _ = io::stdout().flush();
            })
            .await?;
        if outcome.is_retryable() {
            eprintln!("Sorry, try again.");
            continue;
        }
        result = report(runner.description(), outcome);
        break;
    }

    drop(staged);
    result
}

// ============================================================
// Privileged actions
// ============================================================

async fn run_action(config: &AppConfig, args: RunArgs) -> Result<()> {
    let (command, description) = match args.action {
        RunAction::Remove { names, cascade } => {
            if names.is_empty() {
                bail!("No packages given");
            }
            (
                commands::remove_packages(&names, cascade),
                format!("Remove {}", names.join(", ")),
            )
        }
        RunAction::RemoveOrphans => {
            let names: Vec<String> = open_inventory(config)?
                .orphan_packages()
                .into_iter()
                .map(|p| p.name)
                .collect();
            if names.is_empty() {
                println!("No orphaned packages");
                return Ok(());
            }
            (
                commands::remove_orphans(&names),
                format!("Remove {} orphaned packages", names.len()),
            )
        }
        RunAction::Install { names } => {
            if names.is_empty() {
                bail!("No packages given");
            }
            (
                commands::install_packages(&names),
                format!("Install {}", names.join(", ")),
            )
        }
        RunAction::Upgrade { names, aur } => {
            let helper = if aur {
                let path = std::env::var("PATH").unwrap_or_default();
                Some(commands::detect_aur_helper(&path).context("No AUR helper (yay or paru) found")?)
            } else {
                None
            };
            match (names.is_empty(), helper) {
                (true, helper) => (commands::update_system(helper), "Upgrade system".to_string()),
                (false, Some(helper)) => (
                    commands::update_aur_packages(helper, &names),
                    format!("Upgrade {}", names.join(", ")),
                ),
                (false, None) => (
                    commands::update_packages(&names),
                    format!("Upgrade {}", names.join(", ")),
                ),
            }
        }
        RunAction::Sync => (commands::sync_databases(), "Sync package databases".to_string()),
        RunAction::CleanCache => (commands::clean_cache(), "Clean package cache".to_string()),
        RunAction::PruneCache { keep } => (
            commands::prune_cache(keep),
            format!("Keep the last {} versions in the package cache", keep),
        ),
        RunAction::RefreshKeyrings => (commands::refresh_keyrings(), "Refresh keyrings".to_string()),
        RunAction::Unlock => (
            commands::remove_db_lock(&config.db_path),
            "Remove pacman database lock".to_string(),
        ),
        RunAction::MergePacnew => (commands::merge_pacnew(), "Merge .pacnew files".to_string()),
    };

    if args.dry_run {
        println!("{}", command);
        return Ok(());
    }
    run_interactive(config, command, &description).await
}

/// Run `command` as root, streaming its output and forwarding lines typed on
/// stdin. Ctrl-C cancels the command.
async fn run_interactive(config: &AppConfig, command: String, description: &str) -> Result<()> {
    let runner = PrivilegedRunner::new(command, description, RunnerConfig::from(config));
    eprintln!(":: {}\n   {}", runner.description(), runner.command());

    let mut lines = spawn_stdin_reader();
    for _ in 0..MAX_PASSWORD_ATTEMPTS {
        let password = read_password(&mut lines).await?;
        let mut running = runner.start(&password)?;

        let outcome = loop {
            tokio::select! {
                event = running.next_event() => match event {
                    Some(RunnerEvent::Started) => {}
                    Some(RunnerEvent::Output(text)) => {
                        print!("{}", text);
                        io::stdout().flush()?;
                    }
                    Some(RunnerEvent::Finished(outcome)) => break outcome,
                    None => bail!("Runner stopped without reporting an outcome"),
                },
                Some(line) = lines.recv() => {
                    if let Err(e) = running.send_input(&line) {
                        tracing::warn!("Input not delivered: {}", e);
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    eprintln!("\nCancelling...");
                    running.terminate().await;
                }
            }
        };

        if outcome.is_retryable() {
            eprintln!("Sorry, try again.");
            continue;
        }
        return report(runner.description(), outcome);
    }
    bail!("Too many incorrect password attempts")
}

fn report(description: &str, outcome: RunOutcome) -> Result<()> {
    match outcome {
        RunOutcome::Success => {
            println!(":: {} finished", description);
            Ok(())
        }
        RunOutcome::CredentialRejected => bail!("Password rejected"),
        RunOutcome::Failed { code, signal, .. } => match (code, signal) {
            (Some(code), _) => bail!("{} failed with exit code {}", description, code),
            (None, Some(signal)) => bail!("{} was stopped by signal {}", description, signal),
            (None, None) => bail!("{} failed", description),
        },
    }
}

// ============================================================
// Terminal input
// ============================================================

/// Lines typed on stdin, read on a detached thread so a pending read never
/// holds up exit.
fn spawn_stdin_reader() -> UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

async fn read_password(lines: &mut UnboundedReceiver<String>) -> Result<String> {
    eprint!("[archmaster] password: ");
    io::stderr().flush()?;

    let password = {
        let _echo = EchoGuard::disable();
        lines.recv().await
    };
    eprintln!();

    let password = password.context("stdin closed before a password was entered")?;
    if password.is_empty() {
        bail!("A password is required");
    }
    Ok(password)
}

/// Turns terminal echo off on stdin until dropped. Does nothing when stdin
/// is not a terminal.
struct EchoGuard {
    saved: Option<libc::termios>,
}

impl EchoGuard {
    fn disable() -> Self {
        let mut term: libc::termios = unsafe { std::mem::zeroed() };
        if unsafe { libc::tcgetattr(libc::STDIN_FILENO, &mut term) } != 0 {
            return Self { saved: None };
        }
        let mut quiet = term;
        quiet.c_lflag &= !libc::ECHO;
        unsafe {
            libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &quiet);
        }
        Self { saved: Some(term) }
    }
}

impl Drop for EchoGuard {
    fn drop(&mut self) {
        if let Some(term) = &self.saved {
            unsafe {
                libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, term);
            }
        }
    }
}
