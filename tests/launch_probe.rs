// This file is part of TRINCI.
//
// Copyright (C) 2021 Affidaty Spa.
//
// TRINCI is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the
// Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// TRINCI is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License
// for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with TRINCI. If not, see <https://www.gnu.org/licenses/>.

//! Probe launch between independent parties connected by an in-process
//! network, with a shared notary.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};
use trinci_probe::{
    base::{RwLock, SignedTransaction, TransactionSignature, X500Name},
    channel::Receiver,
    db::{Db, MemoryDb},
    flow::{
        launch::{LaunchProbe, LaunchProbeAcceptor, LaunchProbeParams},
        FlowConfig, FlowLogic, FlowRun, FlowStatus, LocalNetwork, RunStatus, Session,
        SessionMessage, SessionPayload, Transport, LAUNCH_PROBE_ACCEPTOR, LAUNCH_PROBE_FLOW,
    },
    identity::Directory,
    ledger::builder,
    notary::{Notary, NotaryResponse, NotaryService},
    Error, ErrorKind, FlowEngine, KeyPair, Party, Result,
};
use uuid::Uuid;

const EARTH: &str = "O=Earth, L=THIRD, C=GB, OU=planet";
const MARS: &str = "O=Mars, L=FIFTH, C=GB, OU=planet";
const PLUTO: &str = "O=Pluto, L=NINTH, C=GB, OU=dwarf-planet";
const VENUS: &str = "O=Venus, L=SECOND, C=GB, OU=planet";
const NOTARY: &str = "O=Notary, L=SUN, C=GB";

/// Notary keeping count of the submitted transactions.
struct CountingNotary {
    inner: NotaryService,
    count: AtomicUsize,
}

impl Notary for CountingNotary {
    fn identity(&self) -> Party {
        self.inner.identity()
    }

    fn notarize(&self, tx: &SignedTransaction) -> NotaryResponse {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.inner.notarize(tx)
    }
}

/// Transport losing the notarized transaction on its way to the target.
struct FinalityLoss {
    network: Arc<LocalNetwork>,
    /// Report the loss to the sender.
    fail: bool,
}

impl Transport for FinalityLoss {
    fn deliver(&self, msg: SessionMessage) -> Result<()> {
        match msg.payload {
            SessionPayload::Finality(_) if self.fail => {
                Err(Error::new_ext(ErrorKind::BadNetwork, "link down"))
            }
            SessionPayload::Finality(_) => Ok(()),
            _ => self.network.deliver(msg),
        }
    }
}

struct SolarSystem {
    network: Arc<LocalNetwork>,
    directory: Arc<Directory>,
    notary: Arc<CountingNotary>,
    notary_party: Party,
}

fn create_party(name: &str, seed: u8) -> (Party, KeyPair) {
    let keypair = KeyPair::from_seed(&[seed; 32]).unwrap();
    let party = Party::new(X500Name::parse(name).unwrap(), keypair.public_key());
    (party, keypair)
}

impl SolarSystem {
    fn new() -> Self {
        let (notary, keypair) = create_party(NOTARY, 0xaa);
        let directory = Directory::new();
        directory.register_notary(notary.clone());
        let service = CountingNotary {
            inner: NotaryService::new(notary.clone(), keypair),
            count: AtomicUsize::new(0),
        };
        SolarSystem {
            network: Arc::new(LocalNetwork::new()),
            directory: Arc::new(directory),
            notary: Arc::new(service),
            notary_party: notary,
        }
    }

    fn notarizations(&self) -> usize {
        self.notary.count.load(Ordering::SeqCst)
    }

    /// Node whose session envelopes are left unread.
    fn deaf_node(&self, name: &str, seed: u8) -> (FlowEngine<MemoryDb>, Receiver<SessionMessage>) {
        let (party, _) = create_party(name, seed);
        self.directory.register(party);
        self.unlisted_node(name, seed, self.network.clone())
    }

    /// Node reachable through the network but unknown to the directory.
    fn unlisted_node(
        &self,
        name: &str,
        seed: u8,
        transport: Arc<dyn Transport>,
    ) -> (FlowEngine<MemoryDb>, Receiver<SessionMessage>) {
        let (party, keypair) = create_party(name, seed);
        let rx_chan = self.network.register(&party);
        let config = FlowConfig {
            session_timeout_ms: 500,
            page_size: 2,
        };
        let engine = FlowEngine::new(
            party,
            keypair,
            config,
            Arc::new(RwLock::new(MemoryDb::new())),
            self.directory.clone(),
            self.notary.clone(),
            transport,
        );
        (engine, rx_chan)
    }

    fn node(&self, name: &str, seed: u8) -> FlowEngine<MemoryDb> {
        let (engine, rx_chan) = self.deaf_node(name, seed);
        let _ = engine.listen(rx_chan);
        engine
    }

    /// Listening node sending through `transport`.
    fn node_with_transport(
        &self,
        name: &str,
        seed: u8,
        transport: Arc<dyn Transport>,
    ) -> FlowEngine<MemoryDb> {
        let (party, _) = create_party(name, seed);
        self.directory.register(party);
        let (engine, rx_chan) = self.unlisted_node(name, seed, transport);
        let _ = engine.listen(rx_chan);
        engine
    }
}

fn launch_params(message: &str, target: &str, restricted: bool) -> String {
    format!(
        r#"{{"message":"{}","target":"{}","restrictedToPeerClass":"{}"}}"#,
        message, target, restricted
    )
}

fn wait_terminal(engine: &FlowEngine<MemoryDb>, run_id: &Uuid) -> FlowStatus {
    for _ in 0..100 {
        let status = engine.status_of(run_id).unwrap();
        if status.status != RunStatus::Running {
            return status;
        }
        thread::sleep(Duration::from_millis(50));
    }
    panic!("run {} did not terminate", run_id);
}

fn wait_sessions_closed(engine: &FlowEngine<MemoryDb>) {
    for _ in 0..100 {
        if engine.open_sessions() == 0 {
            return;
        }
        thread::sleep(Duration::from_millis(50));
    }
    panic!("{} sessions still open", engine.open_sessions());
}

fn records_count(engine: &FlowEngine<MemoryDb>) -> usize {
    engine
        .ledger()
        .query(|_| true, 10)
        .map(|page| page.values.len())
        .sum()
}

#[test]
fn launch_to_dwarf_planet() {
    let system = SolarSystem::new();
    let earth = system.node(EARTH, 3);
    let pluto = system.node(PLUTO, 9);

    let res = earth
        .start(LAUNCH_PROBE_FLOW, "tok-1", &launch_params("Hello pluto", PLUTO, false))
        .unwrap();

    let status = wait_terminal(&earth, &res.run_id);
    assert_eq!(status.status, RunStatus::Completed);
    assert!(status.result_json.unwrap().contains("Hello pluto"));
    assert_eq!(
        pluto.received_messages(),
        vec!["From: OU=planet, O=Earth, L=THIRD, C=GB - Message: Hello pluto".to_owned()]
    );
    assert_eq!(records_count(&earth), 1);
    assert!(earth.received_messages().is_empty());
    assert_eq!(system.notarizations(), 1);
    wait_sessions_closed(&earth);
    wait_sessions_closed(&pluto);
}

#[test]
fn restricted_launch_to_dwarf_planet() {
    let system = SolarSystem::new();
    let earth = system.node(EARTH, 3);
    let pluto = system.node(PLUTO, 9);

    let res = earth
        .start(LAUNCH_PROBE_FLOW, "tok-1", &launch_params("Hello pluto", PLUTO, true))
        .unwrap();

    let status = wait_terminal(&earth, &res.run_id);
    assert_eq!(status.status, RunStatus::Failed);
    assert_eq!(
        status.error_message.unwrap(),
        "contract violation: Planetary Probes Must only visit planets"
    );
    assert_eq!(records_count(&earth), 0);
    assert_eq!(records_count(&pluto), 0);
}

#[test]
fn restricted_launch_to_planet() {
    let system = SolarSystem::new();
    let earth = system.node(EARTH, 3);
    let mars = system.node(MARS, 4);

    let res = earth
        .start(LAUNCH_PROBE_FLOW, "tok-1", &launch_params("Hey Mars", MARS, true))
        .unwrap();

    let status = wait_terminal(&earth, &res.run_id);
    assert_eq!(status.status, RunStatus::Completed);
    assert_eq!(mars.received_messages().len(), 1);
}

#[test]
fn launch_without_target() {
    let system = SolarSystem::new();
    let earth = system.node(EARTH, 3);

    let res = earth
        .start(
            LAUNCH_PROBE_FLOW,
            "tok-1",
            r#"{"message":"Hello","restrictedToPeerClass":"false"}"#,
        )
        .unwrap();

    let status = earth.status_of(&res.run_id).unwrap();
    assert_eq!(status.status, RunStatus::Failed);
    assert_eq!(status.error_message.unwrap(), "missing parameter: target");
    assert_eq!(records_count(&earth), 0);
}

#[test]
fn launch_twice_with_same_token() {
    let system = SolarSystem::new();
    let earth = system.node(EARTH, 3);
    let mars = system.node(MARS, 4);
    let params = launch_params("Hey Mars", MARS, false);

    let res1 = earth.start(LAUNCH_PROBE_FLOW, "tok-1", &params).unwrap();
    let res2 = earth.start(LAUNCH_PROBE_FLOW, "tok-1", &params).unwrap();

    assert_eq!(res1.run_id, res2.run_id);
    let status = wait_terminal(&earth, &res1.run_id);
    assert_eq!(status.status, RunStatus::Completed);
    let res3 = earth.start(LAUNCH_PROBE_FLOW, "tok-1", &params).unwrap();
    assert_eq!(res3.run_id, res1.run_id);
    assert_eq!(records_count(&earth), 1);
    assert_eq!(records_count(&mars), 1);
}

#[test]
fn launch_with_duplicate_delivery() {
    let system = SolarSystem::new();
    system.network.set_duplicate_delivery(true);
    let earth = system.node(EARTH, 3);
    let mars = system.node(MARS, 4);

    let res = earth
        .start(LAUNCH_PROBE_FLOW, "tok-1", &launch_params("Hey Mars", MARS, false))
        .unwrap();

    let status = wait_terminal(&earth, &res.run_id);
    assert_eq!(status.status, RunStatus::Completed);
    assert_eq!(records_count(&earth), 1);
    assert_eq!(records_count(&mars), 1);
}

#[test]
fn launch_to_silent_peer() {
    let system = SolarSystem::new();
    let earth = system.node(EARTH, 3);
    let (_mars, _mars_rx) = system.deaf_node(MARS, 4);

    let res = earth
        .start(LAUNCH_PROBE_FLOW, "tok-1", &launch_params("Hey Mars", MARS, false))
        .unwrap();

    let status = wait_terminal(&earth, &res.run_id);
    assert_eq!(status.status, RunStatus::Failed);
    assert!(status.error_message.unwrap().starts_with("session timeout"));
    assert_eq!(records_count(&earth), 0);
}

#[test]
fn received_messages_newest_first() {
    let system = SolarSystem::new();
    let earth = system.node(EARTH, 3);
    let mars = system.node(MARS, 4);
    let pluto = system.node(PLUTO, 9);

    let res = earth
        .start(LAUNCH_PROBE_FLOW, "tok-1", &launch_params("Hey Mars", MARS, false))
        .unwrap();
    assert_eq!(wait_terminal(&earth, &res.run_id).status, RunStatus::Completed);
    let res = pluto
        .start(LAUNCH_PROBE_FLOW, "tok-1", &launch_params("Greetings", MARS, true))
        .unwrap();
    assert_eq!(wait_terminal(&pluto, &res.run_id).status, RunStatus::Completed);
    let res = mars
        .start(LAUNCH_PROBE_FLOW, "tok-1", &launch_params("Hi back", EARTH, false))
        .unwrap();
    assert_eq!(wait_terminal(&mars, &res.run_id).status, RunStatus::Completed);

    assert_eq!(
        mars.received_messages(),
        vec![
            "From: OU=dwarf-planet, O=Pluto, L=NINTH, C=GB - Message: Greetings".to_owned(),
            "From: OU=planet, O=Earth, L=THIRD, C=GB - Message: Hey Mars".to_owned(),
        ]
    );
    assert_eq!(records_count(&mars), 3);
}

#[test]
fn finality_lost_on_the_way() {
    let system = SolarSystem::new();
    let lossy = Arc::new(FinalityLoss {
        network: system.network.clone(),
        fail: false,
    });
    let earth = system.node_with_transport(EARTH, 3, lossy);
    let mars = system.node(MARS, 4);

    let res = earth
        .start(LAUNCH_PROBE_FLOW, "tok-1", &launch_params("Hey Mars", MARS, false))
        .unwrap();

    let status = wait_terminal(&earth, &res.run_id);
    assert_eq!(status.status, RunStatus::Completed);
    assert!(status.result_json.unwrap().contains("txId"));
    assert_eq!(status.error_message, None);
    assert_eq!(records_count(&earth), 1);
    assert_eq!(records_count(&mars), 0);
    assert_eq!(system.notarizations(), 1);
    let res2 = earth
        .start(LAUNCH_PROBE_FLOW, "tok-1", &launch_params("Hey Mars", MARS, false))
        .unwrap();
    assert_eq!(res2.run_id, res.run_id);
    assert_eq!(system.notarizations(), 1);
}

#[test]
fn finality_delivery_failure() {
    let system = SolarSystem::new();
    let lossy = Arc::new(FinalityLoss {
        network: system.network.clone(),
        fail: true,
    });
    let earth = system.node_with_transport(EARTH, 3, lossy);
    let _mars = system.node(MARS, 4);

    let res = earth
        .start(LAUNCH_PROBE_FLOW, "tok-1", &launch_params("Hey Mars", MARS, false))
        .unwrap();

    let status = wait_terminal(&earth, &res.run_id);
    assert_eq!(status.status, RunStatus::Completed);
    assert!(status.result_json.is_some());
    assert_eq!(records_count(&earth), 1);
}

#[test]
fn launch_from_unknown_party() {
    let system = SolarSystem::new();
    let (venus, venus_rx) = system.unlisted_node(VENUS, 2, system.network.clone());
    let _ = venus.listen(venus_rx);
    let mars = system.node(MARS, 4);

    let res = venus
        .start(LAUNCH_PROBE_FLOW, "tok-1", &launch_params("Hey Mars", MARS, false))
        .unwrap();

    let status = wait_terminal(&venus, &res.run_id);
    assert_eq!(status.status, RunStatus::Failed);
    assert!(status
        .error_message
        .unwrap()
        .starts_with("no such party: unknown launcher"));
    assert_eq!(records_count(&mars), 0);
    assert_eq!(system.notarizations(), 0);
}

#[test]
fn resume_launch_from_notarization() {
    let system = SolarSystem::new();
    system.network.set_duplicate_delivery(true);
    let earth = system.node(EARTH, 3);
    let mars = system.node(MARS, 4);
    let (_, earth_kp) = create_party(EARTH, 3);
    let (_, mars_kp) = create_party(MARS, 4);
    let params = launch_params("Hey Mars", MARS, false);

    // Both runs stopped after the signature exchange: the launcher is about
    // to notarize and the target waits for the notarized transaction.
    let unsigned = builder::launch(
        "Hey Mars",
        false,
        earth.me().clone(),
        mars.me().clone(),
        system.notary_party.clone(),
    )
    .unwrap();
    let partial = unsigned.clone().sign(&earth_kp);
    let signature = TransactionSignature::create(&mars_kp, &partial.id());
    let full = partial.clone().with_signature(signature.clone()).unwrap();
    let session_id = Uuid::new_v4();

    let earth_run_id = Uuid::new_v4();
    let launcher = LaunchProbe {
        params: LaunchProbeParams::parse(&params).unwrap(),
        session: Some(Session {
            id: session_id,
            local_run: earth_run_id,
            peer: mars.me().clone(),
            initiating_flow: Some(LAUNCH_PROBE_FLOW.to_owned()),
            send_seq: 1,
            recv_seq: 1,
        }),
        unsigned: Some(unsigned),
        tx: Some(full),
        notarized: None,
        digest: None,
    };
    let mut earth_run = FlowRun::new(
        earth_run_id,
        "tok-1",
        LAUNCH_PROBE_FLOW,
        FlowLogic::LaunchProbe(launcher),
    );
    earth_run.checkpoint.as_mut().unwrap().step = 4;
    earth.db_arc().write().store_run(&earth_run).unwrap();

    let mars_run_id = Uuid::new_v4();
    let acceptor = LaunchProbeAcceptor {
        session: Session {
            id: session_id,
            local_run: mars_run_id,
            peer: earth.me().clone(),
            initiating_flow: None,
            send_seq: 1,
            recv_seq: 1,
        },
        tx: Some(partial),
        signature: Some(signature),
        notarized: None,
    };
    let mut mars_run = FlowRun::new(
        mars_run_id,
        &format!("session-{}", session_id),
        LAUNCH_PROBE_ACCEPTOR,
        FlowLogic::LaunchProbeAcceptor(acceptor),
    );
    mars_run.checkpoint.as_mut().unwrap().step = 4;
    mars.db_arc().write().store_run(&mars_run).unwrap();

    assert_eq!(mars.recover(), 1);
    assert_eq!(earth.recover(), 1);

    assert_eq!(wait_terminal(&earth, &earth_run_id).status, RunStatus::Completed);
    assert_eq!(wait_terminal(&mars, &mars_run_id).status, RunStatus::Completed);
    assert_eq!(system.notarizations(), 1);
    assert_eq!(records_count(&earth), 1);
    assert_eq!(records_count(&mars), 1);
    assert_eq!(
        mars.received_messages(),
        vec!["From: OU=planet, O=Earth, L=THIRD, C=GB - Message: Hey Mars".to_owned()]
    );
}
