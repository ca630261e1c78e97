//! `ike-init-demo`: a small CLI that drives two [`ike_init_task::IkeInitTask`]
//! instances through a loopback `IKE_SA_INIT` exchange (and, if the chosen
//! proposal names one, the follow-on `IKE_INTERMEDIATE` round) and prints
//! the resulting keymat, for manual smoke-testing of the task without a full
//! IKE daemon attached.

use std::net::SocketAddr;

use clap::{Parser, Subcommand};
use tracing::info;

use ike_init_task::bus::TracingBus;
use ike_init_task::config::Settings;
use ike_init_task::keymat::{DefaultKeymat, Keymat};
use ike_init_task::message::InMemoryMessage;
use ike_init_task::noncegen::SystemNonceGen;
use ike_init_task::payload::{Proposal, Transform, TransformType};
use ike_init_task::proposal::{select_proposal, SelectionFlags};
use ike_init_task::sa::{Extension, ExtensionFlags, IkeConfig, IkeSaHandle, PeerConfig, SaState};
use ike_init_task::{IkeInitTask, TaskStatus};

#[derive(Parser)]
#[command(name = "ike-init-demo")]
#[command(about = "IKE_SA_INIT / IKE_INTERMEDIATE task driver")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a loopback initiator/responder pair through IKE_SA_INIT
    Run {
        /// Also negotiate an ADDITIONAL_KEY_EXCHANGE_1 transform and run the
        /// resulting IKE_INTERMEDIATE round
        #[arg(long)]
        multi_ke: bool,
    },
    /// Print the settings the task would load (`ike-init.toml`, then the
    /// `IKE_INIT_*` environment namespace, then built-in defaults)
    ShowConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let log_level = match cli.log_level.as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };
    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run { multi_ke } => run_demo(multi_ke),
        Commands::ShowConfig => show_config()?,
    }

    Ok(())
}

fn show_config() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::load()?;
    println!("{settings:#?}");
    Ok(())
}

/// A single-proposal, always-accepting [`IkeConfig`] — good enough to drive
/// the task end to end without a real daemon's configuration store behind
/// it.
struct DemoIkeConfig {
    proposal: Proposal,
}

impl IkeConfig for DemoIkeConfig {
    fn get_proposals(&self) -> Vec<Proposal> {
        vec![self.proposal.clone()]
    }

    fn select_proposal(&self, proposals: &[Proposal], flags: SelectionFlags) -> Option<Proposal> {
        select_proposal(proposals, &[self.proposal.clone()], flags)
    }

    fn fragmentation(&self) -> bool {
        true
    }

    fn childless(&self) -> bool {
        false
    }
}

struct DemoPeerConfig;

impl PeerConfig for DemoPeerConfig {
    fn auth_hash_algorithms(&self) -> Vec<u16> {
        vec![2, 3, 4]
    }

    fn get_ppk_id(&self) -> Option<Vec<u8>> {
        None
    }
}

/// A minimal in-memory [`IkeSaHandle`], standing in for the surrounding
/// daemon's own SA type the way [`InMemoryMessage`] stands in for the wire
/// message.
struct DemoIkeSa {
    id: u64,
    ike_cfg: DemoIkeConfig,
    peer_cfg: DemoPeerConfig,
    keymat: DefaultKeymat,
    extensions: ExtensionFlags,
    proposal: Option<Proposal>,
    state: SaState,
    addr: SocketAddr,
}

impl DemoIkeSa {
    fn new(id: u64, proposal: Proposal, peer_addr: SocketAddr) -> Self {
        Self {
            id,
            ike_cfg: DemoIkeConfig { proposal },
            peer_cfg: DemoPeerConfig,
            keymat: DefaultKeymat::default(),
            extensions: ExtensionFlags::default(),
            proposal: None,
            state: SaState::Connecting,
            addr: peer_addr,
        }
    }
}

impl IkeSaHandle for DemoIkeSa {
    fn get_id(&self) -> u64 {
        self.id
    }

    fn get_ike_cfg(&self) -> &dyn IkeConfig {
        &self.ike_cfg
    }

    fn set_ike_cfg(&mut self, _cfg: Box<dyn IkeConfig>) {
        // Never called: `alternative_ike_cfgs` below has nothing to offer,
        // so the task never picks an alternative to switch onto.
    }

    fn alternative_ike_cfgs(&self) -> Vec<Box<dyn IkeConfig>> {
        // The demo only ever configures the one IKE config.
        Vec::new()
    }

    fn get_peer_cfg(&self) -> &dyn PeerConfig {
        &self.peer_cfg
    }

    fn get_keymat(&mut self) -> &mut dyn Keymat {
        &mut self.keymat
    }

    fn get_name(&self) -> &str {
        "demo"
    }

    fn get_unique_id(&self) -> u64 {
        self.id
    }

    fn get_other_host(&self) -> SocketAddr {
        self.addr
    }

    fn set_state(&mut self, state: SaState) {
        self.state = state;
    }

    fn set_proposal(&mut self, proposal: Proposal) {
        self.proposal = Some(proposal);
    }

    fn get_proposal(&self) -> Option<&Proposal> {
        self.proposal.as_ref()
    }

    fn set_peer_spi(&mut self, _spi: Vec<u8>) {
        // The demo never rekeys, so this is never called.
    }

    fn enable_extension(&mut self, ext: Extension) {
        self.extensions.enable(ext);
    }

    fn supports_extension(&self, ext: Extension) -> bool {
        self.extensions.supports(ext)
    }

    fn reset(&mut self) {
        self.proposal = None;
    }

    fn handle_redirect(&mut self, _target: &[u8]) -> bool {
        false
    }

    fn get_connect_id(&self) -> Option<Vec<u8>> {
        None
    }

    fn get_redirected_from(&self) -> Option<Vec<u8>> {
        None
    }
}

fn demo_proposal(multi_ke: bool) -> Proposal {
    let mut transforms = vec![
        Transform::new(TransformType::EncryptionAlgorithm, 20),
        Transform::new(TransformType::PseudoRandomFunction, 5),
        Transform::new(TransformType::IntegrityAlgorithm, 12),
        Transform::new(TransformType::KeyExchangeMethod, 31),
    ];
    if multi_ke {
        transforms.push(Transform::new(TransformType::AdditionalKeyExchange1, 31));
    }
    Proposal {
        proposal_num: 1,
        protocol_id: 1,
        spi: Vec::new(),
        transforms,
    }
}

fn run_demo(multi_ke: bool) {
    let initiator_addr: SocketAddr = "127.0.0.1:500".parse().unwrap();
    let responder_addr: SocketAddr = "127.0.0.1:4500".parse().unwrap();

    let proposal = demo_proposal(multi_ke);
    let mut sa_i = DemoIkeSa::new(1, proposal.clone(), responder_addr);
    let mut sa_r = DemoIkeSa::new(1, proposal, initiator_addr);
    let bus = TracingBus;

    let mut task_i = IkeInitTask::new(true, Box::new(SystemNonceGen::default()), &Settings::default());
    let mut task_r = IkeInitTask::new(false, Box::new(SystemNonceGen::default()), &Settings::default());

    let mut request = InMemoryMessage::new(initiator_addr, responder_addr);
    info!(?request, "initiator building IKE_SA_INIT request");
    let status = task_i.build(&mut request, &mut sa_i, &bus);
    println!("initiator build       -> {status:?}");

    let status = task_r.process(&request, &mut sa_r, &bus);
    println!("responder process     -> {status:?}");

    let mut response = InMemoryMessage::new(responder_addr, initiator_addr);
    let status = task_r.build(&mut response, &mut sa_r, &bus);
    println!("responder build       -> {status:?}");

    let status = task_i.pre_process(&response);
    println!("initiator pre_process -> {status:?}");

    let mut status = task_i.process(&response, &mut sa_i, &bus);
    println!("initiator process     -> {status:?}");

    if multi_ke {
        while status == TaskStatus::NeedMore {
            let mut follow_up_req = InMemoryMessage::new(initiator_addr, responder_addr);
            task_i.build(&mut follow_up_req, &mut sa_i, &bus);
            task_i.post_build(&mut sa_i, &bus);

            task_r.process(&follow_up_req, &mut sa_r, &bus);
            task_r.post_process(&mut sa_r, &bus);

            let mut follow_up_resp = InMemoryMessage::new(responder_addr, initiator_addr);
            task_r.build(&mut follow_up_resp, &mut sa_r, &bus);
            task_r.post_build(&mut sa_r, &bus);

            status = task_i.process(&follow_up_resp, &mut sa_i, &bus);
            task_i.post_process(&mut sa_i, &bus);
            println!("intermediate round    -> {status:?}");
        }
    }

    match sa_i.keymat.keys() {
        Some(keys) => println!("initiator SK_d = {}", hex(&keys.sk_d)),
        None => println!("initiator derived no keys"),
    }
    match sa_r.keymat.keys() {
        Some(keys) => println!("responder SK_d = {}", hex(&keys.sk_d)),
        None => println!("responder derived no keys"),
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
