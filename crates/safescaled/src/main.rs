//! safescaled — SafeScale daemon.
//!
//! No gRPC transport (out of scope per spec §1): subcommands stand in
//! directly for the RPC handlers a real transport would dispatch to,
//! exactly as spec §6a describes. Each invocation loads one tenant's
//! config, builds its decorated [`Provider`](safescale_provider::Provider),
//! and runs a single C8/C9/C10/C11 operation to completion.

mod context;
mod feature_cmd;
mod host_cmd;
mod network_cmd;
mod tenant_cmd;
mod vip_cmd;

use clap::{Parser, Subcommand};
use context::{default_data_dir, Daemon};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "safescaled")]
#[command(about = "SafeScale infrastructure orchestrator daemon")]
#[command(version)]
struct Cli {
    /// Directory the blob store (tenant config + resource metadata) is
    /// rooted at.
    #[arg(long, global = true, default_value_os_t = default_data_dir())]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Tenant configuration (credentials + region + provider choice).
    Tenant {
        #[command(subcommand)]
        cmd: TenantCommands,
    },
    /// Host lifecycle: create, delete, power control, remote execution.
    Host {
        #[command(subcommand)]
        cmd: HostCommands,
    },
    /// Network/subnet lifecycle.
    Network {
        #[command(subcommand)]
        cmd: NetworkCommands,
    },
    /// Virtual IP lifecycle.
    Vip {
        #[command(subcommand)]
        cmd: VipCommands,
    },
    /// Feature installer: check/add/remove over a YAML feature file.
    Feature {
        #[command(subcommand)]
        cmd: FeatureCommands,
    },
}

#[derive(Subcommand)]
enum TenantCommands {
    Create {
        name: String,
        #[arg(long)]
        provider: String,
        #[arg(long)]
        region: Option<String>,
        /// Provider-specific setting as `key=value`, repeatable.
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
    },
    List,
    Show { name: String },
    Delete { name: String },
}

#[derive(Subcommand)]
enum HostCommands {
    Create {
        #[arg(long)]
        tenant: String,
        name: String,
        #[arg(long)]
        image: Option<String>,
        #[arg(long)]
        template: Option<String>,
        /// Subnet reference (name, or `id:<id>`), repeatable.
        #[arg(long = "subnet")]
        subnets: Vec<String>,
        #[arg(long)]
        public_ip: bool,
        #[arg(long)]
        gateway: bool,
        #[arg(long, default_value_t = 1)]
        min_cpus: u32,
        #[arg(long, default_value_t = 1024)]
        min_ram_mb: u32,
        #[arg(long, default_value_t = 10)]
        min_disk_gb: u32,
        #[arg(long)]
        password: Option<String>,
    },
    Delete {
        #[arg(long)]
        tenant: String,
        r#ref: String,
    },
    List {
        #[arg(long)]
        tenant: String,
    },
    Inspect {
        #[arg(long)]
        tenant: String,
        r#ref: String,
    },
    Start {
        #[arg(long)]
        tenant: String,
        r#ref: String,
    },
    Stop {
        #[arg(long)]
        tenant: String,
        r#ref: String,
    },
    Reboot {
        #[arg(long)]
        tenant: String,
        r#ref: String,
    },
    Run {
        #[arg(long)]
        tenant: String,
        r#ref: String,
        command: String,
        #[arg(long, default_value_t = 300)]
        timeout_secs: u64,
    },
}

#[derive(Subcommand)]
enum NetworkCommands {
    CreateNetwork {
        #[arg(long)]
        tenant: String,
        name: String,
        #[arg(long)]
        cidr: String,
    },
    CreateSubnet {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        network: String,
        name: String,
        #[arg(long)]
        cidr: String,
    },
    DeleteSubnet {
        #[arg(long)]
        tenant: String,
        r#ref: String,
    },
    DeleteNetwork {
        #[arg(long)]
        tenant: String,
        r#ref: String,
    },
    List {
        #[arg(long)]
        tenant: String,
    },
    /// Get-or-create the single-host fallback network (spec §4.8 step 4).
    EnsureSingleHostSubnet {
        #[arg(long)]
        tenant: String,
    },
}

#[derive(Subcommand)]
enum VipCommands {
    Create {
        #[arg(long)]
        tenant: String,
        name: String,
        #[arg(long)]
        network: String,
    },
    AddPublicIp {
        #[arg(long)]
        tenant: String,
        r#ref: String,
    },
    Bind {
        #[arg(long)]
        tenant: String,
        r#ref: String,
        #[arg(long)]
        host_id: String,
    },
    Unbind {
        #[arg(long)]
        tenant: String,
        r#ref: String,
        #[arg(long)]
        host_id: String,
    },
    Show {
        #[arg(long)]
        tenant: String,
        r#ref: String,
    },
    Delete {
        #[arg(long)]
        tenant: String,
        r#ref: String,
    },
}

#[derive(Subcommand)]
enum FeatureCommands {
    Check {
        #[arg(long)]
        tenant: String,
        file: PathBuf,
        #[arg(long, default_value = "bash")]
        method: String,
        #[arg(long = "host")]
        hosts: Vec<String>,
        #[arg(long = "master")]
        masters: Vec<String>,
        #[arg(long = "node")]
        nodes: Vec<String>,
        #[arg(long = "gateway")]
        gateways: Vec<String>,
    },
    Add {
        #[arg(long)]
        tenant: String,
        file: PathBuf,
        #[arg(long, default_value = "bash")]
        method: String,
        #[arg(long = "host")]
        hosts: Vec<String>,
        #[arg(long = "master")]
        masters: Vec<String>,
        #[arg(long = "node")]
        nodes: Vec<String>,
        #[arg(long = "gateway")]
        gateways: Vec<String>,
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,
        #[arg(long)]
        skip_proxy: bool,
    },
    Remove {
        #[arg(long)]
        tenant: String,
        file: PathBuf,
        #[arg(long, default_value = "bash")]
        method: String,
        #[arg(long = "host")]
        hosts: Vec<String>,
        #[arg(long = "master")]
        masters: Vec<String>,
        #[arg(long = "node")]
        nodes: Vec<String>,
        #[arg(long = "gateway")]
        gateways: Vec<String>,
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("safescaled=info".parse()?))
        .init();

    let cli = Cli::parse();
    let daemon = Daemon::open(&cli.data_dir);

    let result = dispatch(&daemon, cli.command).await;
    match result {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(e) => {
            let err = serde_json::json!({"ok": false, "error": e.to_string()});
            println!("{}", serde_json::to_string_pretty(&err)?);
            std::process::exit(1);
        }
    }
}

async fn dispatch(daemon: &Daemon, command: Commands) -> anyhow::Result<serde_json::Value> {
    match command {
        Commands::Tenant { cmd } => match cmd {
            TenantCommands::Create { name, provider, region, set } => tenant_cmd::create(daemon, &name, &provider, region, &set),
            TenantCommands::List => tenant_cmd::list(daemon),
            TenantCommands::Show { name } => tenant_cmd::show(daemon, &name),
            TenantCommands::Delete { name } => tenant_cmd::delete(daemon, &name),
        },
        Commands::Host { cmd } => match cmd {
            HostCommands::Create {
                tenant,
                name,
                image,
                template,
                subnets,
                public_ip,
                gateway,
                min_cpus,
                min_ram_mb,
                min_disk_gb,
                password,
            } => {
                let ctx = daemon.context_for(&tenant)?;
                host_cmd::create(&ctx, &name, image, template, &subnets, public_ip, gateway, min_cpus, min_ram_mb, min_disk_gb, password).await
            }
            HostCommands::Delete { tenant, r#ref } => {
                let ctx = daemon.context_for(&tenant)?;
                host_cmd::delete(&ctx, &r#ref).await
            }
            HostCommands::List { tenant } => {
                let ctx = daemon.context_for(&tenant)?;
                host_cmd::list(&ctx).await
            }
            HostCommands::Inspect { tenant, r#ref } => {
                let ctx = daemon.context_for(&tenant)?;
                host_cmd::inspect(&ctx, &r#ref)
            }
            HostCommands::Start { tenant, r#ref } => {
                let ctx = daemon.context_for(&tenant)?;
                host_cmd::start(&ctx, &r#ref).await
            }
            HostCommands::Stop { tenant, r#ref } => {
                let ctx = daemon.context_for(&tenant)?;
                host_cmd::stop(&ctx, &r#ref).await
            }
            HostCommands::Reboot { tenant, r#ref } => {
                let ctx = daemon.context_for(&tenant)?;
                host_cmd::reboot(&ctx, &r#ref).await
            }
            HostCommands::Run { tenant, r#ref, command, timeout_secs } => {
                let ctx = daemon.context_for(&tenant)?;
                host_cmd::run(&ctx, &r#ref, &command, timeout_secs).await
            }
        },
        Commands::Network { cmd } => match cmd {
            NetworkCommands::CreateNetwork { tenant, name, cidr } => {
                let ctx = daemon.context_for(&tenant)?;
                network_cmd::create_network(&ctx, &name, &cidr).await
            }
            NetworkCommands::CreateSubnet { tenant, network, name, cidr } => {
                let ctx = daemon.context_for(&tenant)?;
                network_cmd::create_subnet(&ctx, &network, &name, &cidr).await
            }
            NetworkCommands::DeleteSubnet { tenant, r#ref } => {
                let ctx = daemon.context_for(&tenant)?;
                network_cmd::delete_subnet(&ctx, &r#ref).await
            }
            NetworkCommands::DeleteNetwork { tenant, r#ref } => {
                let ctx = daemon.context_for(&tenant)?;
                network_cmd::delete_network(&ctx, &r#ref).await
            }
            NetworkCommands::List { tenant } => {
                let ctx = daemon.context_for(&tenant)?;
                network_cmd::list(&ctx).await
            }
            NetworkCommands::EnsureSingleHostSubnet { tenant } => {
                let ctx = daemon.context_for(&tenant)?;
                network_cmd::ensure_single_host_subnet(&ctx).await
            }
        },
        Commands::Vip { cmd } => match cmd {
            VipCommands::Create { tenant, name, network } => {
                let ctx = daemon.context_for(&tenant)?;
                vip_cmd::create(&ctx, &name, &network).await
            }
            VipCommands::AddPublicIp { tenant, r#ref } => {
                let ctx = daemon.context_for(&tenant)?;
                vip_cmd::add_public_ip(&ctx, &r#ref).await
            }
            VipCommands::Bind { tenant, r#ref, host_id } => {
                let ctx = daemon.context_for(&tenant)?;
                vip_cmd::bind(&ctx, &r#ref, &host_id).await
            }
            VipCommands::Unbind { tenant, r#ref, host_id } => {
                let ctx = daemon.context_for(&tenant)?;
                vip_cmd::unbind(&ctx, &r#ref, &host_id).await
            }
            VipCommands::Show { tenant, r#ref } => {
                let ctx = daemon.context_for(&tenant)?;
                vip_cmd::show(&ctx, &r#ref)
            }
            VipCommands::Delete { tenant, r#ref } => {
                let ctx = daemon.context_for(&tenant)?;
                vip_cmd::delete(&ctx, &r#ref).await
            }
        },
        Commands::Feature { cmd } => match cmd {
            FeatureCommands::Check { tenant, file, method, hosts, masters, nodes, gateways } => {
                let ctx = daemon.context_for(&tenant)?;
                feature_cmd::check(&ctx, &file, &method, &hosts, &masters, &nodes, &gateways).await
            }
            FeatureCommands::Add { tenant, file, method, hosts, masters, nodes, gateways, vars, skip_proxy } => {
                let ctx = daemon.context_for(&tenant)?;
                feature_cmd::add(&ctx, &file, &method, &hosts, &masters, &nodes, &gateways, &vars, skip_proxy).await
            }
            FeatureCommands::Remove { tenant, file, method, hosts, masters, nodes, gateways, vars } => {
                let ctx = daemon.context_for(&tenant)?;
                feature_cmd::remove(&ctx, &file, &method, &hosts, &masters, &nodes, &gateways, &vars).await
            }
        },
    }
}
