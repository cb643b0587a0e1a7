// skylink: ground and payload link tool
//
// Talks to the payload computer over a TCP-bridged serial link, builds and
// inspects authenticated radio command packets offline, decodes beacons and
// manages the persisted anti-replay counters.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use skylink_core::radio::{AuthStatus, Command, CommandId, PacketCodec, ParsedPacket};
use skylink_core::serial::{PacketLink, StreamChannel};
use skylink_core::state::{AntiReplayStore, BootSync, ReplayState, StateStore};
use skylink_core::telemetry::{decode_beacon, unwrap_beacon_frame, BeaconDecode};
use skylink_core::transfer::TransferReport;
use skylink_core::{AuthPolicy, PayloadClient, PayloadServer};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "skylink")]
#[command(about = "Skylink: ground-to-spacecraft link tool", long_about = None)]
#[command(version)]
struct Cli {
    /// Log protocol detail (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Serial bridge address (overrides link_address)
    #[arg(short, long, global = true)]
    connect: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the payload command server
    Serve {
        /// Directory the server may read and write
        #[arg(short, long)]
        root: Option<PathBuf>,
        /// Wait for the bridge to connect instead of dialing it
        #[arg(short, long)]
        listen: bool,
    },
    /// Check the payload is answering
    Ping,
    /// Payload temperature, boot count and free memory
    Info,
    /// List a payload directory
    Ls {
        #[arg(default_value = "")]
        path: String,
    },
    /// CRC32 of a payload file
    Crc { path: String },
    /// Delete a payload file
    Rm { path: String },
    /// Download a file from the payload
    Fetch { remote: String, local: PathBuf },
    /// Upload a file to the payload
    Push { local: PathBuf, remote: String },
    /// Build or inspect radio command packets
    Packet {
        #[command(subcommand)]
        action: PacketAction,
    },
    /// Decode beacon telemetry
    Beacon {
        #[command(subcommand)]
        action: BeaconAction,
    },
    /// Inspect or adjust the anti-replay counters
    State {
        #[command(subcommand)]
        action: StateAction,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum PacketAction {
    /// Build an authenticated command packet (consumes a message id)
    Build {
        /// no_op, payload_exec, payload_turn_on, payload_turn_off, manual_state_override
        command: String,
        arg: Option<String>,
        #[arg(long, default_value = "255")]
        dst: u8,
        #[arg(long, default_value = "0")]
        seq: u8,
    },
    /// Parse and verify a hex encoded packet
    Parse { hex: String },
}

#[derive(Subcommand)]
enum BeaconAction {
    /// Decode a hex encoded beacon
    Decode {
        hex: String,
        /// Input still carries the leading length byte
        #[arg(short, long)]
        framed: bool,
        /// Adopt the beacon's reboot counter into the state file
        #[arg(short, long)]
        sync: bool,
        /// Print the decode as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum StateAction {
    Show,
    SetBoot { boot_count: u32 },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    let config = config::Config::load()?;
    let address = cli.connect.unwrap_or_else(|| config.link_address.clone());

    match cli.command {
        Commands::Serve { root, listen } => cmd_serve(&config, &address, root, listen),
        Commands::Ping => cmd_ping(&config, &address),
        Commands::Info => cmd_info(&config, &address),
        Commands::Ls { path } => cmd_ls(&config, &address, &path),
        Commands::Crc { path } => cmd_crc(&config, &address, &path),
        Commands::Rm { path } => cmd_rm(&config, &address, &path),
        Commands::Fetch { remote, local } => cmd_fetch(&config, &address, &remote, local),
        Commands::Push { local, remote } => cmd_push(&config, &address, local, &remote),
        Commands::Packet { action } => cmd_packet(&config, action),
        Commands::Beacon { action } => cmd_beacon(&config, action),
        Commands::State { action } => cmd_state(&config, action),
        Commands::Config { action } => cmd_config(config, action),
    }
}

type TcpLink = PacketLink<StreamChannel<TcpStream>>;

fn dial(config: &config::Config, address: &str) -> Result<TcpLink> {
    let stream = TcpStream::connect(address)
        .with_context(|| format!("Failed to connect to serial bridge at {}", address))?;
    stream.set_nodelay(true)?;
    Ok(PacketLink::with_config(StreamChannel::new(stream), config.link))
}

fn client(
    config: &config::Config,
    address: &str,
) -> Result<PayloadClient<StreamChannel<TcpStream>>> {
    Ok(PayloadClient::new(dial(config, address)?).with_transfer_config(config.transfer))
}

fn open_state(config: &config::Config) -> Result<Arc<AntiReplayStore>> {
    let path = config.state_file()?;
    let initial = ReplayState {
        boot_count: config.initial_boot_count,
        msg_id: 0,
    };
    let store = AntiReplayStore::open(StateStore::file(&path), initial)
        .with_context(|| format!("Failed to open state file {}", path.display()))?
        .with_lower_boot_policy(config.boot_policy);
    Ok(Arc::new(store))
}

fn cmd_serve(
    config: &config::Config,
    address: &str,
    root: Option<PathBuf>,
    listen: bool,
) -> Result<()> {
    let root = match root.or_else(|| config.payload_root.as_ref().map(PathBuf::from)) {
        Some(root) => root,
        None => std::env::current_dir()?,
    };

    let link = if listen {
        let listener = TcpListener::bind(address)
            .with_context(|| format!("Failed to listen on {}", address))?;
        println!("{} Waiting for the bridge on {}", "•".bright_green(), address.bright_cyan());
        let (stream, peer) = listener.accept()?;
        stream.set_nodelay(true)?;
        println!("{} Bridge connected from {}", "✓".green(), peer);
        PacketLink::with_config(StreamChannel::new(stream), config.link)
    } else {
        dial(config, address)?
    };

    println!("{}", "Payload server".bold());
    println!("  Link: {}", address.bright_cyan());
    println!("  Root: {}", root.display().to_string().bright_cyan());

    info!("Serving payload root {} on {}", root.display(), address);
    let mut server = PayloadServer::new(link, root).with_transfer_config(config.transfer);
    server.serve().context("Payload link closed")?;
    Ok(())
}

fn cmd_ping(config: &config::Config, address: &str) -> Result<()> {
    let reply = client(config, address)?.ping()?;
    println!("{} {}", "✓".green(), reply.bright_cyan());
    Ok(())
}

fn cmd_info(config: &config::Config, address: &str) -> Result<()> {
    let info = client(config, address)?.info()?;
    println!("{}", "Payload".bold());
    println!("  Temperature: {}", info.temp.bright_cyan());
    println!("  Boot count:  {}", info.id.bright_cyan());
    println!("  Memory:      {}", info.storage.bright_cyan());
    Ok(())
}

fn cmd_ls(config: &config::Config, address: &str, path: &str) -> Result<()> {
    let names = client(config, address)?.list_dir(path)?;

    if names.is_empty() {
        println!("{}", "(empty)".dimmed());
    } else {
        for name in names {
            println!("  {}", name);
        }
    }
    Ok(())
}

fn cmd_crc(config: &config::Config, address: &str, path: &str) -> Result<()> {
    let crc = client(config, address)?.crc_file(path)?;
    println!("{:08x}  {}", crc, path.bright_cyan());
    Ok(())
}

fn cmd_rm(config: &config::Config, address: &str, path: &str) -> Result<()> {
    client(config, address)?.delete_file(path)?;
    println!("{} Deleted {}", "✓".green(), path.bright_cyan());
    Ok(())
}

fn cmd_fetch(config: &config::Config, address: &str, remote: &str, local: PathBuf) -> Result<()> {
    let report = client(config, address)?
        .fetch_file(remote, &local)
        .with_context(|| format!("Failed to fetch {}", remote))?;
    println!("{} Fetched {} -> {}", "✓".green(), remote.bright_cyan(), local.display());
    print_report(&report);
    Ok(())
}

fn cmd_push(config: &config::Config, address: &str, local: PathBuf, remote: &str) -> Result<()> {
    let report = client(config, address)?
        .push_file(&local, remote)
        .with_context(|| format!("Failed to push {}", local.display()))?;
    println!("{} Pushed {} -> {}", "✓".green(), local.display(), remote.bright_cyan());
    print_report(&report);
    Ok(())
}

fn print_report(report: &TransferReport) {
    println!("  Bytes:           {}", report.bytes);
    println!("  Chunks:          {}", report.total_chunks);
    println!("  Resent:          {}", report.resent_chunks);
    println!("  Reconciliations: {}", report.reconciliations);
}

fn cmd_packet(config: &config::Config, action: PacketAction) -> Result<()> {
    match action {
        PacketAction::Build {
            command,
            arg,
            dst,
            seq,
        } => {
            let id = CommandId::from_name(&command)
                .with_context(|| format!("Unknown command: {}", command))?;
            if id.takes_argument() && arg.is_none() {
                anyhow::bail!("{} needs an argument", id);
            }
            let command = Command::new(id, arg.unwrap_or_default());

            let codec = PacketCodec::new(config.key()?, open_state(config)?);
            let packet = codec.create_packet(
                dst,
                skylink_core::radio::station::GROUND_PACKET_SOURCE,
                0,
                seq,
                &command.to_data()?,
            )?;
            let state = codec.state().snapshot();

            println!("{}", hex::encode(&packet).bright_yellow());
            println!();
            println!("  Command:    {}", command.to_string().bright_cyan());
            println!("  Length:     {} bytes", packet.len());
            println!("  Boot count: {}", state.boot_count);
            println!("  Message id: {}", state.msg_id);
        }

        PacketAction::Parse { hex: encoded } => {
            let bytes = hex::decode(encoded.trim()).context("Packet is not valid hex")?;
            // Diagnostic context: report a bad tag instead of refusing the packet
            let policy = match config.station.auth {
                AuthPolicy::Enforce => AuthPolicy::WarnOnly,
                other => other,
            };
            let state = Arc::new(AntiReplayStore::in_memory(ReplayState::default()));
            let codec = PacketCodec::new(config.key()?, state).with_auth_policy(policy);
            print_packet(&codec.parse_packet(&bytes)?);
        }
    }

    Ok(())
}

fn print_packet(packet: &ParsedPacket) {
    let header = &packet.header;
    println!("{}", "Command Packet".bold());
    println!("  Destination: 0x{:02x}", header.dst);
    println!("  Source:      0x{:02x}", header.src);
    println!("  Flags:       0x{:02x}", header.flags);
    println!("  Sequence:    {}", header.seq);
    println!("  Data:        {} ({} bytes)", hex::encode(&packet.data), header.len);

    match Command::from_data(&packet.data) {
        Ok(command) => println!("  Command:     {}", command.to_string().bright_cyan()),
        Err(e) => println!("  Command:     {}", e.to_string().dimmed()),
    }
    if let Some(footer) = packet.footer {
        println!("  Boot count:  {}", footer.boot_count);
        println!("  Message id:  {}", footer.msg_id);
    }

    let auth = match packet.auth {
        AuthStatus::Verified => "verified".green(),
        AuthStatus::Failed => "FAILED".bright_red().bold(),
        AuthStatus::Skipped => "not checked".dimmed(),
    };
    println!("  HMAC:        {}", auth);
}

fn cmd_beacon(config: &config::Config, action: BeaconAction) -> Result<()> {
    match action {
        BeaconAction::Decode {
            hex,
            framed,
            sync,
            json,
        } => {
            let bytes = hex::decode(hex.trim()).context("Beacon is not valid hex")?;
            let body = if framed {
                unwrap_beacon_frame(&bytes)?
            } else {
                &bytes[..]
            };

            let beacon = decode_beacon(body);
            if json {
                println!("{}", serde_json::to_string_pretty(&beacon)?);
            } else {
                print_beacon(&beacon);
            }

            if sync {
                let stats = beacon
                    .stats
                    .as_ref()
                    .context("Beacon carries no stats to sync from")?;
                let outcome = open_state(config)?.sync_boot_count(stats.reboot_counter)?;
                println!();
                print_boot_sync(outcome);
            }
        }
    }

    Ok(())
}

fn print_beacon(beacon: &BeaconDecode) {
    println!("{}", "Beacon".bold());
    println!("  State: {}", beacon.state_name.bright_cyan());

    match &beacon.stats {
        Some(stats) => {
            println!("  Reboots:        {}", stats.reboot_counter);
            println!("  Time in state:  {} ms", stats.time_in_state_ms);
            println!("  RX:             {} bytes / {} packets", stats.rx_bytes, stats.rx_packets);
            println!(
                "  RX drops:       {} backpressure / {} bad",
                stats.rx_backpressure_drops, stats.rx_bad_packet_drops
            );
            println!("  TX:             {} bytes / {} packets", stats.tx_bytes, stats.tx_packets);
            println!(
                "  Battery:        {} mV / {} mA",
                stats.battery_voltage, stats.battery_current
            );
            println!(
                "  Solar:          {} mV / {} mA",
                stats.solar_voltage, stats.solar_current
            );
            println!("  Status:         {}", stats.device_status);
        }
        None => println!("  {}", "(no stats)".dimmed()),
    }

    if let Some(adcs) = &beacon.adcs {
        println!("{}", "ADCS".bold());
        println!("  Angular velocity: {:.4}", adcs.angular_velocity);
        let q = &adcs.quaternion;
        println!(
            "  Quaternion:       [{:.4}, {:.4}, {:.4}, {:.4}] |q| = {:.4}",
            q.q0,
            q.q1,
            q.q2,
            q.q3,
            q.magnitude()
        );
        println!("  State:            {}", adcs.state);
        println!("  Boot count:       {}", adcs.boot_count);
    }

    for issue in &beacon.issues {
        println!("  {} {}", "⚠".bright_red(), issue);
    }
}

fn print_boot_sync(outcome: BootSync) {
    match outcome {
        BootSync::Unchanged => println!("{} Boot count unchanged", "✓".green()),
        BootSync::Advanced { from, to } => {
            println!("{} Boot count advanced {} -> {}", "✓".green(), from, to)
        }
        BootSync::Lowered { from, to } => println!(
            "{} Boot count lowered {} -> {}",
            "⚠".bright_red().bold(),
            from,
            to
        ),
        BootSync::RejectedLower { current, observed } => println!(
            "{} Kept boot count {} (beacon reported {})",
            "⚠".bright_red().bold(),
            current,
            observed
        ),
    }
}

fn cmd_state(config: &config::Config, action: StateAction) -> Result<()> {
    let state = open_state(config)?;

    match action {
        StateAction::Show => {
            let snapshot = state.snapshot();
            println!("{}", "Anti-replay State".bold());
            println!("  File:       {}", config.state_file()?.display().to_string().dimmed());
            println!("  Boot count: {}", snapshot.boot_count.to_string().bright_cyan());
            println!("  Message id: {}", snapshot.msg_id.to_string().bright_cyan());
        }

        StateAction::SetBoot { boot_count } => {
            state.set_boot_count(boot_count)?;
            println!("{} Boot count set to {}", "✓".green(), boot_count);
        }
    }

    Ok(())
}

fn cmd_config(mut config: config::Config, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save()?;
            let shown = if key == "psk" { "(hidden)" } else { value.as_str() };
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), shown);
        }

        ConfigAction::Get { key } => {
            if let Some(value) = config.get(&key) {
                println!("{} = {}", key.bright_cyan(), value);
            } else {
                anyhow::bail!("Unknown config key: {}", key);
            }
        }

        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!();

            for (key, value) in config.list() {
                println!("  {:<20} {}", key.bright_cyan(), value);
            }
        }
    }

    Ok(())
}
