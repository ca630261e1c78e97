//! End-to-end scenarios driving two `IkeInitTask`s against each other through
//! in-memory mock collaborators, covering the concrete scenarios `spec.md`
//! §8 fixes the expected shapes of: happy path, cookie retry, invalid-KE
//! retry, duplicate cookie rejection, multi-KE plumbing, and redirect nonce
//! validation.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Mutex;

use ike_init_task::bus::{AlertCode, AlertPayload, Bus};
use ike_init_task::config::Settings;
use ike_init_task::keymat::{DefaultKeymat, Keymat};
use ike_init_task::message::{ExchangeType, InMemoryMessage, Message, NotifyType, PayloadKind};
use ike_init_task::payload::{Proposal, Transform, TransformType};
use ike_init_task::proposal::SelectionFlags;
use ike_init_task::sa::{Extension, IkeConfig, IkeSaHandle, OldSaRef, PeerConfig, SaState};
use ike_init_task::noncegen::SystemNonceGen;
use ike_init_task::{IkeInitTask, TaskStatus};

fn addr(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

fn aes_gcm_sha256_ecp256() -> Proposal {
    Proposal {
        proposal_num: 1,
        protocol_id: 1,
        spi: vec![],
        transforms: vec![
            Transform::new(TransformType::EncryptionAlgorithm, 20),
            Transform::new(TransformType::PseudoRandomFunction, 5),
            Transform::new(TransformType::IntegrityAlgorithm, 12),
            Transform::new(TransformType::KeyExchangeMethod, 19),
        ],
    }
}

#[derive(Clone)]
struct StubIkeConfig {
    proposals: Vec<Proposal>,
    fragmentation: bool,
    childless: bool,
}

impl IkeConfig for StubIkeConfig {
    fn get_proposals(&self) -> Vec<Proposal> {
        self.proposals.clone()
    }

    fn select_proposal(&self, proposals: &[Proposal], flags: SelectionFlags) -> Option<Proposal> {
        ike_init_task::proposal::select_proposal(proposals, &self.proposals, flags)
    }

    fn fragmentation(&self) -> bool {
        self.fragmentation
    }

    fn childless(&self) -> bool {
        self.childless
    }
}

#[derive(Default)]
struct StubPeerConfig;

impl PeerConfig for StubPeerConfig {
    fn auth_hash_algorithms(&self) -> Vec<u16> {
        Vec::new()
    }

    fn get_ppk_id(&self) -> Option<Vec<u8>> {
        None
    }
}

struct StubIkeSa {
    id: u64,
    ike_cfg: StubIkeConfig,
    alt_cfgs: Vec<StubIkeConfig>,
    peer_cfg: StubPeerConfig,
    keymat: DefaultKeymat,
    proposal: Option<Proposal>,
    extensions: ike_init_task::sa::ExtensionFlags,
    other_host: SocketAddr,
    reset_calls: u32,
    redirect_accepts: bool,
    redirected_from: Option<Vec<u8>>,
    set_ike_cfg_calls: u32,
    peer_spi: Option<Vec<u8>>,
}

impl StubIkeSa {
    fn new(id: u64, proposals: Vec<Proposal>, other_host: SocketAddr) -> Self {
        Self {
            id,
            ike_cfg: StubIkeConfig {
                proposals,
                fragmentation: false,
                childless: false,
            },
            alt_cfgs: Vec::new(),
            peer_cfg: StubPeerConfig,
            keymat: DefaultKeymat::default(),
            proposal: None,
            extensions: ike_init_task::sa::ExtensionFlags::default(),
            other_host,
            reset_calls: 0,
            redirect_accepts: true,
            redirected_from: None,
            set_ike_cfg_calls: 0,
            peer_spi: None,
        }
    }
}

impl IkeSaHandle for StubIkeSa {
    fn get_id(&self) -> u64 {
        self.id
    }

    fn get_ike_cfg(&self) -> &dyn IkeConfig {
        &self.ike_cfg
    }

    fn set_ike_cfg(&mut self, _cfg: Box<dyn IkeConfig>) {
        self.set_ike_cfg_calls += 1;
    }

    fn alternative_ike_cfgs(&self) -> Vec<Box<dyn IkeConfig>> {
        self.alt_cfgs
            .iter()
            .cloned()
            .map(|c| Box::new(c) as Box<dyn IkeConfig>)
            .collect()
    }

    fn get_peer_cfg(&self) -> &dyn PeerConfig {
        &self.peer_cfg
    }

    fn get_keymat(&mut self) -> &mut dyn Keymat {
        &mut self.keymat
    }

    fn get_name(&self) -> &str {
        "stub"
    }

    fn get_unique_id(&self) -> u64 {
        self.id
    }

    fn get_other_host(&self) -> SocketAddr {
        self.other_host
    }

    fn set_state(&mut self, _state: SaState) {}

    fn set_proposal(&mut self, proposal: Proposal) {
        self.proposal = Some(proposal);
    }

    fn get_proposal(&self) -> Option<&Proposal> {
        self.proposal.as_ref()
    }

    fn set_peer_spi(&mut self, spi: Vec<u8>) {
        self.peer_spi = Some(spi);
    }

    fn enable_extension(&mut self, ext: Extension) {
        self.extensions.enable(ext);
    }

    fn supports_extension(&self, ext: Extension) -> bool {
        self.extensions.supports(ext)
    }

    fn reset(&mut self) {
        self.reset_calls += 1;
    }

    fn handle_redirect(&mut self, _target: &[u8]) -> bool {
        self.redirect_accepts
    }

    fn get_connect_id(&self) -> Option<Vec<u8>> {
        None
    }

    fn get_redirected_from(&self) -> Option<Vec<u8>> {
        self.redirected_from.clone()
    }
}

#[derive(Default)]
struct RecordingBus {
    alerts: Mutex<Vec<AlertCode>>,
}

impl Bus for RecordingBus {
    fn ike_keys(
        &self,
        _proposal: &Proposal,
        _kes: &[Box<dyn ike_init_task::keyexchange::KeyExchange>],
        _nonce_i: &[u8],
        _nonce_r: &[u8],
        _predecessor: Option<(u16, &[u8])>,
    ) {
    }

    fn alert(&self, code: AlertCode, _payload: AlertPayload) {
        self.alerts.lock().unwrap().push(code);
    }
}

#[test]
fn happy_path_single_ke_converges_to_identical_keymat() {
    let settings = Settings::default();
    let bus = RecordingBus::default();

    let mut task_i = IkeInitTask::new(true, Box::new(SystemNonceGen::default()), &settings);
    let mut task_r = IkeInitTask::new(false, Box::new(SystemNonceGen::default()), &settings);

    let mut sa_i = StubIkeSa::new(1, vec![aes_gcm_sha256_ecp256()], addr(501));
    let mut sa_r = StubIkeSa::new(2, vec![aes_gcm_sha256_ecp256()], addr(500));

    let mut msg1 = InMemoryMessage::new(addr(500), addr(501));
    assert_eq!(task_i.build(&mut msg1, &mut sa_i, &bus), TaskStatus::NeedMore);
    assert_eq!(msg1.get_exchange_type(), Some(ExchangeType::IkeSaInit));
    assert!(msg1.get_payload(PayloadKind::SecurityAssociation).is_some());
    assert!(msg1.get_payload(PayloadKind::KeyExchange).is_some());
    assert!(msg1.get_payload(PayloadKind::Nonce).is_some());

    assert_eq!(task_r.process(&msg1, &mut sa_r, &bus), TaskStatus::NeedMore);

    let mut msg2 = InMemoryMessage::new(addr(501), addr(500));
    assert_eq!(task_r.build(&mut msg2, &mut sa_r, &bus), TaskStatus::Success);

    assert_eq!(task_i.pre_process(&msg2), TaskStatus::NeedMore);
    assert_eq!(task_i.process(&msg2, &mut sa_i, &bus), TaskStatus::Success);

    let keys_i = sa_i.keymat.keys().expect("initiator derived keys").clone();
    let keys_r = sa_r.keymat.keys().expect("responder derived keys").clone();
    assert_eq!(keys_i.sk_d, keys_r.sk_d);
    assert_eq!(keys_i.sk_ei, keys_r.sk_ei);
    assert_eq!(keys_i.sk_pr, keys_r.sk_pr);

    assert_eq!(
        task_i.get_lower_nonce(),
        task_r.get_lower_nonce(),
        "both sides must agree on the lexicographically lower nonce"
    );
}

#[test]
fn cookie_retry_preserves_nonce_and_ke_then_succeeds() {
    let settings = Settings::default();
    let bus = RecordingBus::default();
    let mut task_i = IkeInitTask::new(true, Box::new(SystemNonceGen::default()), &settings);
    let mut sa_i = StubIkeSa::new(1, vec![aes_gcm_sha256_ecp256()], addr(501));

    let mut msg1 = InMemoryMessage::new(addr(500), addr(501));
    assert_eq!(task_i.build(&mut msg1, &mut sa_i, &bus), TaskStatus::NeedMore);
    let nonce1 = msg1
        .get_payload(PayloadKind::Nonce)
        .unwrap()
        .as_nonce()
        .unwrap()
        .data
        .clone();
    let ke1 = msg1
        .get_payload(PayloadKind::KeyExchange)
        .unwrap()
        .as_ke()
        .unwrap()
        .clone();

    let mut cookie_msg = InMemoryMessage::new(addr(501), addr(500));
    cookie_msg.add_notify(false, NotifyType::Cookie.as_u16(), vec![0xDE, 0xAD, 0xBE, 0xEF]);

    assert_eq!(task_i.pre_process(&cookie_msg), TaskStatus::NeedMore);
    assert_eq!(
        task_i.process(&cookie_msg, &mut sa_i, &bus),
        TaskStatus::NeedMore
    );
    assert_eq!(sa_i.reset_calls, 1);

    let mut msg2 = InMemoryMessage::new(addr(500), addr(501));
    assert_eq!(task_i.build(&mut msg2, &mut sa_i, &bus), TaskStatus::NeedMore);

    let cookie_notify = msg2.get_notify(NotifyType::Cookie.as_u16()).unwrap();
    assert_eq!(cookie_notify.data, vec![0xDE, 0xAD, 0xBE, 0xEF]);

    let nonce2 = msg2
        .get_payload(PayloadKind::Nonce)
        .unwrap()
        .as_nonce()
        .unwrap()
        .data
        .clone();
    let ke2 = msg2
        .get_payload(PayloadKind::KeyExchange)
        .unwrap()
        .as_ke()
        .unwrap()
        .clone();
    assert_eq!(nonce1, nonce2, "my_nonce must survive a cookie retry");
    assert_eq!(ke1, ke2, "the key exchange object must survive a cookie retry");
}

#[test]
fn duplicate_cookie_is_rejected_in_pre_process() {
    let settings = Settings::default();
    let bus = RecordingBus::default();
    let mut task_i = IkeInitTask::new(true, Box::new(SystemNonceGen::default()), &settings);
    let mut sa_i = StubIkeSa::new(1, vec![aes_gcm_sha256_ecp256()], addr(501));

    let mut msg1 = InMemoryMessage::new(addr(500), addr(501));
    task_i.build(&mut msg1, &mut sa_i, &bus);

    let mut cookie_msg = InMemoryMessage::new(addr(501), addr(500));
    cookie_msg.add_notify(false, NotifyType::Cookie.as_u16(), vec![0xAA; 4]);
    task_i.process(&cookie_msg, &mut sa_i, &bus);

    // Same cookie echoed again must be rejected before any state changes.
    assert_eq!(task_i.pre_process(&cookie_msg), TaskStatus::Failed);
}

#[test]
fn invalid_ke_group_retry_switches_method_and_keeps_nonce() {
    let settings = Settings::default();
    let bus = RecordingBus::default();
    let mut task_i = IkeInitTask::new(true, Box::new(SystemNonceGen::default()), &settings);
    let mut sa_i = StubIkeSa::new(1, vec![aes_gcm_sha256_ecp256()], addr(501));

    let mut msg1 = InMemoryMessage::new(addr(500), addr(501));
    task_i.build(&mut msg1, &mut sa_i, &bus);
    let nonce1 = msg1
        .get_payload(PayloadKind::Nonce)
        .unwrap()
        .as_nonce()
        .unwrap()
        .data
        .clone();

    const ECP384: u16 = 20;
    let mut invalid_ke_msg = InMemoryMessage::new(addr(501), addr(500));
    invalid_ke_msg.add_notify(
        true,
        NotifyType::InvalidKeyPayload.as_u16(),
        ECP384.to_be_bytes().to_vec(),
    );

    assert_eq!(
        task_i.process(&invalid_ke_msg, &mut sa_i, &bus),
        TaskStatus::NeedMore
    );

    let mut msg2 = InMemoryMessage::new(addr(500), addr(501));
    assert_eq!(task_i.build(&mut msg2, &mut sa_i, &bus), TaskStatus::NeedMore);
    let ke2 = msg2.get_payload(PayloadKind::KeyExchange).unwrap().as_ke().unwrap();
    assert_eq!(ke2.method, ECP384);

    let nonce2 = msg2
        .get_payload(PayloadKind::Nonce)
        .unwrap()
        .as_nonce()
        .unwrap()
        .data
        .clone();
    assert_eq!(nonce1, nonce2);
}

#[test]
fn redirect_with_wrong_echoed_nonce_fails_before_any_state_change() {
    let settings = Settings::default();
    let bus = RecordingBus::default();
    let mut task_i = IkeInitTask::new(true, Box::new(SystemNonceGen::default()), &settings);
    let mut sa_i = StubIkeSa::new(1, vec![aes_gcm_sha256_ecp256()], addr(501));

    let mut msg1 = InMemoryMessage::new(addr(500), addr(501));
    task_i.build(&mut msg1, &mut sa_i, &bus);

    let mut redirect_data = vec![1u8, 4, 10, 0, 0, 2];
    redirect_data.extend_from_slice(&[0xFF; 32]); // wrong echoed nonce

    let mut redirect_msg = InMemoryMessage::new(addr(501), addr(500));
    redirect_msg.add_notify(true, NotifyType::Redirect.as_u16(), redirect_data);

    assert_eq!(task_i.pre_process(&redirect_msg), TaskStatus::Failed);
}

#[test]
fn redirect_with_correct_echoed_nonce_asks_sa_to_reinitiate() {
    let settings = Settings::default();
    let bus = RecordingBus::default();
    let mut task_i = IkeInitTask::new(true, Box::new(SystemNonceGen::default()), &settings);
    let mut sa_i = StubIkeSa::new(1, vec![aes_gcm_sha256_ecp256()], addr(501));

    let mut msg1 = InMemoryMessage::new(addr(500), addr(501));
    task_i.build(&mut msg1, &mut sa_i, &bus);
    let my_nonce = msg1
        .get_payload(PayloadKind::Nonce)
        .unwrap()
        .as_nonce()
        .unwrap()
        .data
        .clone();

    let mut redirect_data = vec![1u8, 4, 10, 0, 0, 2];
    redirect_data.extend_from_slice(&my_nonce);

    let mut redirect_msg = InMemoryMessage::new(addr(501), addr(500));
    redirect_msg.add_notify(true, NotifyType::Redirect.as_u16(), redirect_data);

    assert_eq!(task_i.pre_process(&redirect_msg), TaskStatus::NeedMore);
    assert_eq!(
        task_i.process(&redirect_msg, &mut sa_i, &bus),
        TaskStatus::NeedMore
    );
}

#[test]
fn multi_ke_plan_runs_an_additional_round_after_the_initial_exchange() {
    let settings = Settings::default();
    let bus = RecordingBus::default();

    let mut proposal = aes_gcm_sha256_ecp256();
    const HYBRID_KEM: u16 = 0x0200; // placeholder post-quantum KEM transform id
    proposal
        .transforms
        .push(Transform::new(TransformType::AdditionalKeyExchange1, HYBRID_KEM));

    let mut task_i = IkeInitTask::new(true, Box::new(SystemNonceGen::default()), &settings);
    let mut task_r = IkeInitTask::new(false, Box::new(SystemNonceGen::default()), &settings);
    let mut sa_i = StubIkeSa::new(1, vec![proposal.clone()], addr(501));
    let mut sa_r = StubIkeSa::new(2, vec![proposal], addr(500));

    let mut msg1 = InMemoryMessage::new(addr(500), addr(501));
    task_i.build(&mut msg1, &mut sa_i, &bus);
    task_r.process(&msg1, &mut sa_r, &bus);

    let mut msg2 = InMemoryMessage::new(addr(501), addr(500));
    // The primary exchange alone must not finish a plan with a pending slot.
    assert_eq!(task_r.build(&mut msg2, &mut sa_r, &bus), TaskStatus::NeedMore);
    assert_eq!(msg2.get_exchange_type(), Some(ExchangeType::IkeSaInit));

    task_i.pre_process(&msg2);
    assert_eq!(task_i.process(&msg2, &mut sa_i, &bus), TaskStatus::NeedMore);

    // Both sides have now swapped into the multi-KE phase for the one
    // additional exchange the plan calls for.
    let mut msg3 = InMemoryMessage::new(addr(500), addr(501));
    assert_eq!(task_i.build(&mut msg3, &mut sa_i, &bus), TaskStatus::NeedMore);
    assert_eq!(
        msg3.get_exchange_type(),
        Some(ExchangeType::IkeIntermediate)
    );
    assert!(msg3.get_payload(PayloadKind::SecurityAssociation).is_none());
    assert!(msg3.get_payload(PayloadKind::KeyExchange).is_some());

    assert_eq!(task_r.process(&msg3, &mut sa_r, &bus), TaskStatus::NeedMore);

    let mut msg4 = InMemoryMessage::new(addr(501), addr(500));
    assert_eq!(task_r.build(&mut msg4, &mut sa_r, &bus), TaskStatus::NeedMore);
    // Responder intermediate-round derivation defers until post_build.
    assert_eq!(task_r.post_build(&mut sa_r, &bus), TaskStatus::Success);

    assert_eq!(task_i.process(&msg4, &mut sa_i, &bus), TaskStatus::NeedMore);
    assert_eq!(task_i.post_process(&mut sa_i, &bus), TaskStatus::Success);

    assert!(sa_i.keymat.keys().is_some());
    assert!(sa_r.keymat.keys().is_some());
}

#[test]
fn responder_falls_back_to_alternative_ike_config_when_primary_rejects_offer() {
    let settings = Settings::default();
    let bus = RecordingBus::default();
    let mut task_i = IkeInitTask::new(true, Box::new(SystemNonceGen::default()), &settings);
    let mut task_r = IkeInitTask::new(false, Box::new(SystemNonceGen::default()), &settings);

    let offered = aes_gcm_sha256_ecp256();
    let mismatched = Proposal {
        proposal_num: 1,
        protocol_id: 1,
        spi: vec![],
        transforms: vec![
            Transform::new(TransformType::EncryptionAlgorithm, 20),
            Transform::new(TransformType::PseudoRandomFunction, 5),
            Transform::new(TransformType::IntegrityAlgorithm, 12),
            Transform::new(TransformType::KeyExchangeMethod, 20),
        ],
    };

    let mut sa_i = StubIkeSa::new(1, vec![offered.clone()], addr(501));
    let mut sa_r = StubIkeSa::new(2, vec![mismatched], addr(500));
    sa_r.alt_cfgs.push(StubIkeConfig {
        proposals: vec![offered],
        fragmentation: false,
        childless: false,
    });

    let mut msg1 = InMemoryMessage::new(addr(500), addr(501));
    task_i.build(&mut msg1, &mut sa_i, &bus);

    // The primary config alone cannot satisfy the initiator's offer; the
    // responder must fall through to the alternative config registered on
    // the SA rather than reporting NO_PROPOSAL_CHOSEN.
    assert_eq!(task_r.process(&msg1, &mut sa_r, &bus), TaskStatus::NeedMore);
    assert_eq!(
        sa_r.set_ike_cfg_calls, 1,
        "must switch onto the matching alternative config exactly once"
    );
    assert!(sa_r.get_proposal().is_some());
}

#[test]
fn rekey_copies_the_negotiated_spi_onto_each_side_identifier() {
    let mut settings = Settings::default();
    // PreferSupplied so selection keeps the offering side's SPI, matching
    // the peer-receives-peer's-half rule this test is checking.
    settings.prefer_configured_proposals = false;
    let bus = RecordingBus::default();

    let old_sa = OldSaRef {
        sk_d: vec![0x11; 32],
        prf_algorithm: 5,
        preferred_group: 19,
    };
    let mut task_i = IkeInitTask::new_rekey(
        true,
        Box::new(SystemNonceGen::default()),
        &settings,
        old_sa.clone(),
    );
    let mut task_r =
        IkeInitTask::new_rekey(false, Box::new(SystemNonceGen::default()), &settings, old_sa);

    let mut sa_i = StubIkeSa::new(7, vec![aes_gcm_sha256_ecp256()], addr(501));
    let mut sa_r = StubIkeSa::new(9, vec![aes_gcm_sha256_ecp256()], addr(500));

    let mut msg1 = InMemoryMessage::new(addr(500), addr(501));
    assert_eq!(task_i.build(&mut msg1, &mut sa_i, &bus), TaskStatus::NeedMore);
    assert_eq!(
        task_r.process(&msg1, &mut sa_r, &bus),
        TaskStatus::NeedMore
    );
    assert_eq!(
        sa_r.peer_spi,
        Some(sa_i.get_id().to_be_bytes().to_vec()),
        "responder must capture the initiator's half of the new SPI"
    );

    let mut msg2 = InMemoryMessage::new(addr(501), addr(500));
    assert_eq!(
        task_r.build(&mut msg2, &mut sa_r, &bus),
        TaskStatus::Success
    );
    assert_eq!(task_i.pre_process(&msg2), TaskStatus::NeedMore);
    assert_eq!(
        task_i.process(&msg2, &mut sa_i, &bus),
        TaskStatus::Success
    );
    assert_eq!(
        sa_i.peer_spi,
        Some(sa_r.get_id().to_be_bytes().to_vec()),
        "initiator must capture the responder's half of the new SPI"
    );
}
