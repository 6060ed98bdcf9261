use anyhow::Result;
use clap::builder::BoolishValueParser;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use kodegen_bundler_keychain::config::{CleanupConfig, HostEnvironment, InstallConfig};
use kodegen_bundler_keychain::outputs::{self, CiHost};
use kodegen_bundler_keychain::profile::{self, ProfileStore};
use kodegen_bundler_keychain::state::JobState;
use kodegen_bundler_keychain::{
    CertificateInstaller, ErrorKind, KeychainError, KeychainManager, SystemToolRunner, console,
    debug, error, info, success, teardown, warn,
};

// Install failures exit 1 and are annotated for the CI host. Cleanup only
// ever warns and always exits 0 so it can run in an always() post step.

#[derive(Parser)]
#[command(name = "kodegen_keychain")]
#[command(version, about = "Install Apple signing certificates into CI keychains")]
struct Cli {
    /// Print debug output (also enabled by RUNNER_DEBUG / SYSTEM_DEBUG)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Where install records what cleanup must undo
    #[arg(long, global = true, env = "KODEGEN_KEYCHAIN_STATE")]
    state_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Decode a P12 certificate and import it into a keychain
    Install(InstallArgs),
    /// Delete the temp keychain and anything else install left behind
    Cleanup(CleanupArgs),
    /// Install a .mobileprovision or .provisionprofile file
    InstallProfile {
        /// Profile to install
        path: PathBuf,
    },
    /// Print the first code signing identity in a keychain
    FindIdentity {
        /// Keychain to search (defaults to the one install used)
        #[arg(long)]
        keychain: Option<PathBuf>,
    },
}

#[derive(Args)]
struct InstallArgs {
    /// TOML file with install settings; other flags override it
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// BASE64 encoded P12 certificate
    #[arg(long, env = "APPLE_CERTIFICATE", hide_env_values = true)]
    certificate: Option<String>,

    /// P12 password
    #[arg(long, env = "APPLE_CERTIFICATE_PASSWORD", hide_env_values = true)]
    certificate_password: Option<String>,

    /// temp, default or custom
    #[arg(long, env = "APPLE_KEYCHAIN")]
    keychain: Option<String>,

    /// Unlock password for default/custom keychains
    #[arg(long, env = "APPLE_KEYCHAIN_PASSWORD", hide_env_values = true)]
    keychain_password: Option<String>,

    /// Keychain path for --keychain custom
    #[arg(long, env = "APPLE_CUSTOM_KEYCHAIN_PATH")]
    custom_keychain_path: Option<String>,

    /// Use this signing identity instead of the certificate's common name
    #[arg(long, env = "APPLE_SIGNING_IDENTITY")]
    signing_identity: Option<String>,
}

impl InstallArgs {
    async fn into_config(self) -> kodegen_bundler_keychain::Result<InstallConfig> {
        let mut config = match &self.config {
            Some(path) => InstallConfig::from_file(path).await?,
            None => InstallConfig::default(),
        };

        if let Some(v) = self.certificate {
            config.encoded_certificate = v;
        }
        if let Some(v) = self.certificate_password {
            config.certificate_password = v;
        }
        if let Some(v) = self.keychain {
            config.keychain = v;
        }
        if self.keychain_password.is_some() {
            config.keychain_password = self.keychain_password;
        }
        if self.custom_keychain_path.is_some() {
            config.custom_keychain_path = self.custom_keychain_path;
        }
        if self.signing_identity.is_some() {
            config.signing_identity = self.signing_identity;
        }
        Ok(config)
    }
}

#[derive(Args)]
struct CleanupArgs {
    /// Also delete the provisioning profile installed by install-profile
    #[arg(long, env = "APPLE_REMOVE_PROFILE", value_parser = BoolishValueParser::new())]
    remove_profile: bool,

    /// Also delete the certificate from a default/custom keychain
    #[arg(long, env = "APPLE_DELETE_CERTIFICATE", value_parser = BoolishValueParser::new())]
    delete_certificate: bool,

    /// Temp keychain to delete when no state was recorded
    #[arg(long)]
    keychain_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    console::init_from_env();
    if cli.verbose {
        console::set_verbose(true);
    }

    let mut host = HostEnvironment::detect();
    if let Some(state_file) = cli.state_file {
        host = host.with_state_file(state_file);
    }
    let ci = CiHost::detect();
    debug!("Host: {} temp={} ci={ci:?}", host.os, host.temp_dir.display());

    let runner = SystemToolRunner::new();
    let code = match cli.command {
        Command::Install(args) => run_install(&runner, &host, &ci, args).await,
        Command::Cleanup(args) => run_cleanup(&runner, &host, &ci, args).await,
        Command::InstallProfile { path } => run_install_profile(&runner, &host, &ci, path).await,
        Command::FindIdentity { keychain } => {
            run_find_identity(&runner, &host, &ci, keychain).await
        }
    };
    Ok(code)
}

async fn run_install(
    runner: &SystemToolRunner,
    host: &HostEnvironment,
    ci: &CiHost,
    args: InstallArgs,
) -> ExitCode {
    let config = match args.into_config().await {
        Ok(config) => config,
        Err(e) => return fail(ci, &e),
    };
    debug!("{config:?}");

    match CertificateInstaller::new(runner, host).install(&config).await {
        Ok(report) => {
            success!(
                "Installed '{}' into {} keychain {}",
                report.properties.common_name,
                report.mode,
                report.keychain_path.display()
            );
            info!("   SHA-1: {}", report.properties.fingerprint);
            if report.partition_granted {
                info!("   Granted codesign access to the private key");
            }

            let mut stdout = std::io::stdout().lock();
            if let Err(e) = outputs::publish(ci, &report.outputs.variables(), &mut stdout) {
                return fail(ci, &e);
            }
            ExitCode::SUCCESS
        }
        Err(e) => fail(ci, &e),
    }
}

async fn run_cleanup(
    runner: &SystemToolRunner,
    host: &HostEnvironment,
    ci: &CiHost,
    args: CleanupArgs,
) -> ExitCode {
    let config = CleanupConfig {
        remove_profile: args.remove_profile,
        delete_certificate: args.delete_certificate,
        keychain_path: args.keychain_path,
    };

    let store = match ProfileStore::user_default() {
        Ok(store) => Some(store),
        Err(e) => {
            debug!("Profile directory unavailable: {e}");
            None
        }
    };

    let report = teardown(runner, host, store.as_ref(), &config).await;

    if let Some(path) = &report.deleted_keychain {
        success!("Deleted temp keychain {}", path.display());
    }
    if report.deleted_certificate {
        success!("Deleted installed certificate");
    }
    if report.removed_profiles > 0 {
        success!("Removed {} provisioning profile file(s)", report.removed_profiles);
    }

    let mut stdout = std::io::stdout().lock();
    for message in &report.warnings {
        let _ = outputs::report_warning(ci, message, &mut stdout);
    }
    ExitCode::SUCCESS
}

async fn run_install_profile(
    runner: &SystemToolRunner,
    host: &HostEnvironment,
    ci: &CiHost,
    path: PathBuf,
) -> ExitCode {
    let result = async {
        let store = ProfileStore::user_default()?;
        profile::install_profile(runner, host, &store, &path).await
    }
    .await;

    match result {
        Ok(profile) => {
            success!(
                "Installed {} profile {} ({})",
                profile.profile_type,
                profile.name.as_deref().unwrap_or("<unnamed>"),
                profile.uuid
            );
            if let Some(env) = profile.cloud_environment {
                info!("   iCloud container environment: {env:?}");
            }

            let vars = outputs::profile_variables(&profile.uuid, profile.name.as_deref());
            let mut stdout = std::io::stdout().lock();
            if let Err(e) = outputs::publish(ci, &vars, &mut stdout) {
                return fail(ci, &e);
            }
            ExitCode::SUCCESS
        }
        Err(e) => fail(ci, &e),
    }
}

async fn run_find_identity(
    runner: &SystemToolRunner,
    host: &HostEnvironment,
    ci: &CiHost,
    keychain: Option<PathBuf>,
) -> ExitCode {
    let result = async {
        host.require_macos()?;
        let manager = KeychainManager::new(runner);
        let path = match keychain {
            Some(path) => path,
            None => match JobState::load(&host.state_file).await?.and_then(|s| s.keychain_path) {
                Some(path) => path,
                None => manager.default_keychain_path().await?,
            },
        };
        manager.find_signing_identity(&path).await
    }
    .await;

    match result {
        Ok(identity) => {
            println!("{identity}");
            ExitCode::SUCCESS
        }
        Err(e) => fail(ci, &e),
    }
}

fn fail(ci: &CiHost, e: &KeychainError) -> ExitCode {
    error!("{e}");
    match e.kind() {
        ErrorKind::Input => info!("   Check the install inputs (see --help)"),
        ErrorKind::Tool => {
            if let Some(stderr) = e.tool_stderr() {
                debug!("tool stderr: {stderr}");
            }
        }
        _ => {}
    }

    let mut stdout = std::io::stdout().lock();
    if let Err(report_err) = outputs::report_failure(ci, &e.to_string(), &mut stdout) {
        warn!("Could not report failure to the CI host: {report_err}");
    }
    ExitCode::FAILURE
}
