use std::sync::mpsc;
use std::sync::{Arc, Mutex, Weak};

use assert_matches::assert_matches;
use bdk_bip47::bitcoin::secp256k1::Secp256k1;
use bdk_bip47::bitcoin::{Amount, Transaction, Txid};
use bdk_bip47::derivation::send_key;
use bdk_bip47::{
    Account, Bip47Wallet, ChainSource, Channel, ChannelStatus, Error, JsonFileStore, KeyStore,
    MemoryBackend, PersistBackend, RescanOutcome, SkipReason, TxClass, TxEvent,
};
use futures::future::BoxFuture;
use rand::RngCore;

mod common;
use common::*;

const ALICE: u8 = 0x0a;
const BOB: u8 = 0x0b;
const CAROL: u8 = 0x0c;

#[test]
fn test_fresh_channel_from_notification() {
    let (alice, _) = get_wallet(ALICE);
    let (bob, bob_backend) = get_wallet(BOB);

    let ntx = notification_tx(&alice, &bob.payment_code(), 0);
    let class = bob.process_received(&ntx, None).unwrap();

    let key = alice.notification_address().unwrap().to_string();
    assert_eq!(
        class,
        TxClass::Notification {
            channel: key.clone(),
            payment_code: alice.payment_code(),
            rescan: RescanOutcome::Skipped(SkipReason::Unconfirmed),
        }
    );

    let channels = bob.channels();
    assert_eq!(channels.len(), 1);
    let channel = &channels[0];
    assert_eq!(channel.notification_address, key);
    assert_eq!(channel.payment_code, Some(alice.payment_code()));
    assert_eq!(channel.incoming_addresses.len(), 1);
    assert_eq!(channel.incoming_addresses[0].index, 0);
    assert!(!channel.incoming_addresses[0].seen);
    assert_eq!(channel.current_incoming_index, 0);
    assert_eq!(channel.status, ChannelStatus::Unsent);
    assert_eq!(channel.ntx_hash, Some(ntx.compute_txid()));

    // the first incoming address is watched
    let watched: Vec<_> = bob_backend
        .imported_keys()
        .unwrap()
        .iter()
        .map(|k| k.address(NETWORK).to_string())
        .collect();
    assert!(watched.contains(&channel.incoming_addresses[0].address));
}

#[test]
fn test_notification_is_idempotent() {
    let (alice, _) = get_wallet(ALICE);
    let (bob, bob_backend) = get_wallet(BOB);
    let ntx = notification_tx(&alice, &bob.payment_code(), 0);

    bob.process_received(&ntx, None).unwrap();
    let keys = bob_backend.imported_keys().unwrap().len();

    let key = alice.notification_address().unwrap().to_string();
    assert_eq!(
        bob.process_received(&ntx, None).unwrap(),
        TxClass::DuplicateNotification {
            channel: key.clone()
        }
    );
    assert_eq!(bob.channel_for(&key).unwrap().incoming_addresses.len(), 1);
    assert_eq!(bob_backend.imported_keys().unwrap().len(), keys);

    // a second notification from the same sender, spending another output
    let ntx = notification_tx(&alice, &bob.payment_code(), 1);
    assert_matches!(
        bob.process_received(&ntx, None),
        Ok(TxClass::DuplicateNotification { .. })
    );
}

#[test]
fn test_notification_to_someone_else() {
    let (alice, _) = get_wallet(ALICE);
    let (bob, _) = get_wallet(BOB);
    let (carol, _) = get_wallet(CAROL);

    let ntx = notification_tx(&alice, &carol.payment_code(), 0);

    assert_eq!(bob.process_received(&ntx, None).unwrap(), TxClass::Irrelevant);
    assert!(bob.channels().is_empty());
}

#[test]
fn test_incoming_payments_advance_the_channel() {
    let secp = Secp256k1::new();
    let alice_account = Account::from_seed(&secp, &[ALICE; 64]).unwrap();
    let (alice, _) = get_wallet(ALICE);
    let (bob, bob_backend) = get_wallet(BOB);
    let key = alice.notification_address().unwrap().to_string();

    bob.process_received(&notification_tx(&alice, &bob.payment_code(), 0), None)
        .unwrap();

    const N: u32 = 5;
    for i in 0..N {
        let script = send_key(&secp, &alice_account, &bob.payment_code(), i)
            .unwrap()
            .script_pubkey();
        assert!(bob_backend.is_mine(&script).unwrap());

        assert_eq!(
            bob.process_received(&payment_tx(script, 10 + i), None)
                .unwrap(),
            TxClass::Payment {
                channel: key.clone(),
                next_index: i + 1,
            }
        );
    }

    let channel = bob.channel_for(&key).unwrap();
    assert_eq!(channel.current_incoming_index, N);
    assert_eq!(channel.incoming_addresses.len(), N as usize + 1);
    assert!(channel.incoming_addresses[..N as usize].iter().all(|a| a.seen));
    assert!(!channel.incoming_addresses[N as usize].seen);
    for (i, address) in channel.incoming_addresses.iter().enumerate() {
        assert_eq!(address.index, i as u32);
        assert_eq!(
            bob.payment_code_for_address(&address.address),
            Some(alice.payment_code())
        );
        assert_eq!(
            bob.channel_for_address(&address.address)
                .unwrap()
                .notification_address,
            key
        );
    }
}

#[test]
fn test_repeated_payment_is_ignored() {
    let secp = Secp256k1::new();
    let alice_account = Account::from_seed(&secp, &[ALICE; 64]).unwrap();
    let (alice, _) = get_wallet(ALICE);
    let (bob, _) = get_wallet(BOB);
    let key = alice.notification_address().unwrap().to_string();

    bob.process_received(&notification_tx(&alice, &bob.payment_code(), 0), None)
        .unwrap();
    let script = send_key(&secp, &alice_account, &bob.payment_code(), 0)
        .unwrap()
        .script_pubkey();

    bob.process_received(&payment_tx(script.clone(), 1), None)
        .unwrap();
    assert_eq!(
        bob.process_received(&payment_tx(script, 2), None).unwrap(),
        TxClass::DuplicatePayment {
            channel: key.clone()
        }
    );
    assert_eq!(bob.channel_for(&key).unwrap().incoming_addresses.len(), 2);
}

#[test]
fn test_outbound_notification() {
    let (alice, alice_backend) = get_wallet(ALICE);
    let (bob, _) = get_wallet(BOB);
    let key = bob.notification_address().unwrap().to_string();

    alice_backend.add_outpoint(outpoint(0)).unwrap();
    let ntx = notification_tx(&alice, &bob.payment_code(), 0);
    assert_eq!(ntx.output[1].value, Amount::from_sat(546));

    assert_matches!(
        alice.process_sent(&ntx, None),
        Ok(TxClass::NotificationSent { channel, txid, .. })
            if channel == key && txid == ntx.compute_txid()
    );

    let channel = alice.channel_for(&key).unwrap();
    assert_eq!(channel.status, ChannelStatus::Sent);
    assert_eq!(channel.ntx_hash, Some(ntx.compute_txid()));
    // created from the address alone
    assert_eq!(channel.payment_code, None);
    assert!(channel.incoming_addresses.is_empty());

    assert_eq!(
        alice.process_sent(&ntx, None).unwrap(),
        TxClass::DuplicateNotification { channel: key }
    );
}

#[test]
fn test_outbound_notification_needs_our_inputs() {
    let (alice, _) = get_wallet(ALICE);
    let (bob, _) = get_wallet(BOB);

    let ntx = notification_tx(&alice, &bob.payment_code(), 0);

    assert_eq!(alice.process_sent(&ntx, None).unwrap(), TxClass::Irrelevant);
    assert!(alice.channels().is_empty());
}

#[test]
fn test_can_send_to() {
    let (alice, alice_backend) = get_wallet(ALICE);
    let (bob, _) = get_wallet(BOB);
    let (carol, _) = get_wallet(CAROL);
    let key = bob.notification_address().unwrap().to_string();

    assert!(!alice.can_send_to(&bob.payment_code()).unwrap());

    alice_backend.add_outpoint(outpoint(0)).unwrap();
    alice
        .process_sent(&notification_tx(&alice, &bob.payment_code(), 0), None)
        .unwrap();

    assert!(alice.can_send_to(&bob.payment_code()).unwrap());
    assert!(!alice.can_send_to(&carol.payment_code()).unwrap());
    // the payment code was filled in
    assert_eq!(
        alice.channel_for(&key).unwrap().payment_code,
        Some(bob.payment_code())
    );
    assert_eq!(
        alice
            .channel_for_payment_code(&bob.payment_code())
            .unwrap()
            .notification_address,
        key
    );
}

#[test]
fn test_outgoing_payments() {
    let (alice, alice_backend) = get_wallet(ALICE);
    let (bob, _) = get_wallet(BOB);
    let bob_key = bob.notification_address().unwrap().to_string();
    let alice_key = alice.notification_address().unwrap().to_string();

    alice_backend.add_outpoint(outpoint(0)).unwrap();
    let ntx = notification_tx(&alice, &bob.payment_code(), 0);
    alice.process_sent(&ntx, None).unwrap();
    bob.process_received(&ntx, None).unwrap();
    assert!(alice.can_send_to(&bob.payment_code()).unwrap());

    for i in 0..3 {
        let channel = alice.channel_for(&bob_key).unwrap();
        let address = alice.next_outgoing_address(&channel).unwrap();

        // Bob watches the address Alice pays
        let bob_channel = bob.channel_for(&alice_key).unwrap();
        assert_eq!(
            bob_channel.incoming_addresses[i as usize].address,
            address.to_string()
        );

        let payment = payment_tx(address.script_pubkey(), 10 + i);
        assert_eq!(
            alice.process_sent(&payment, None).unwrap(),
            TxClass::PaymentSent {
                channel: bob_key.clone(),
                index: i,
            }
        );
        assert_matches!(
            bob.process_received(&payment, None),
            Ok(TxClass::Payment { next_index, .. }) if next_index == i + 1
        );
    }

    assert_eq!(alice.channel_for(&bob_key).unwrap().current_outgoing_index, 3);
}

#[test]
fn test_next_outgoing_address_needs_payment_code() {
    let (alice, _) = get_wallet(ALICE);

    assert_matches!(
        alice.next_outgoing_address(&Channel::new("somebody".into())),
        Err(Error::InvalidPaymentCode)
    );
}

#[test]
fn test_broadcast_marks_sent() {
    let (alice, alice_backend) = get_wallet(ALICE);
    let (bob, _) = get_wallet(BOB);
    let key = bob.notification_address().unwrap().to_string();

    alice_backend.add_outpoint(outpoint(0)).unwrap();
    alice_backend
        .set_broadcast_error(Some("no peers".into()))
        .unwrap();
    let ntx = notification_tx(&alice, &bob.payment_code(), 0);

    assert_matches!(
        futures::executor::block_on(alice.broadcast(ntx.clone())),
        Err(Error::Backend(_))
    );
    assert!(alice.channel_for(&key).is_none());

    alice_backend.set_broadcast_error(None).unwrap();
    let txid = futures::executor::block_on(alice.broadcast(ntx.clone())).unwrap();

    assert_eq!(txid, ntx.compute_txid());
    assert_eq!(alice_backend.broadcasts().unwrap(), vec![ntx]);
    assert!(alice.channel_for(&key).unwrap().is_notification_sent());
}

#[test]
fn test_rollback_guard() {
    let (alice, _) = get_wallet(ALICE);
    let (bob, bob_backend) = get_wallet(BOB);
    bob_backend.set_height(99).unwrap();

    let class = bob
        .process_received(&notification_tx(&alice, &bob.payment_code(), 0), Some(100))
        .unwrap();

    assert_matches!(
        class,
        TxClass::Notification {
            rescan: RescanOutcome::Skipped(SkipReason::AboveTip { height: 100, tip: 99 }),
            ..
        }
    );
    assert!(bob_backend.rollbacks().unwrap().is_empty());
    assert_eq!(bob.channels().len(), 1);
}

#[test]
fn test_confirmed_notification_rolls_back() {
    let (alice, alice_backend) = get_wallet(ALICE);
    let (bob, bob_backend) = get_wallet(BOB);
    bob_backend.set_height(120).unwrap();
    alice_backend.set_height(120).unwrap();
    alice_backend.add_outpoint(outpoint(0)).unwrap();

    let ntx = notification_tx(&alice, &bob.payment_code(), 0);

    assert_matches!(
        bob.process_received(&ntx, Some(100)),
        Ok(TxClass::Notification {
            rescan: RescanOutcome::RolledBack(98),
            ..
        })
    );
    assert_eq!(bob_backend.rollbacks().unwrap(), vec![98]);

    assert_matches!(
        alice.process_sent(&ntx, Some(100)),
        Ok(TxClass::NotificationSent {
            rescan: RescanOutcome::RolledBack(98),
            ..
        })
    );
    assert_eq!(alice_backend.rollbacks().unwrap(), vec![98]);
}

#[test]
fn test_merge_policy() {
    let secp = Secp256k1::new();
    let alice_account = Account::from_seed(&secp, &[ALICE; 64]).unwrap();
    let (alice, _) = get_wallet(ALICE);
    let (bob, _) = get_wallet(BOB);
    let key = alice.notification_address().unwrap().to_string();

    bob.process_received(&notification_tx(&alice, &bob.payment_code(), 0), None)
        .unwrap();
    let script = send_key(&secp, &alice_account, &bob.payment_code(), 0)
        .unwrap()
        .script_pubkey();
    bob.process_received(&payment_tx(script, 1), None).unwrap();
    assert_eq!(bob.channel_for(&key).unwrap().incoming_addresses.len(), 2);

    let merged = bob.import_channels(vec![Channel::new(key.clone())]).unwrap();

    assert_eq!(merged, 0);
    assert_eq!(bob.channel_for(&key).unwrap().incoming_addresses.len(), 2);
}

#[test]
fn test_stale_import_keeps_channel_progress() {
    let secp = Secp256k1::new();
    let alice_account = Account::from_seed(&secp, &[ALICE; 64]).unwrap();
    let (alice, _) = get_wallet(ALICE);
    let (bob, bob_backend) = get_wallet(BOB);
    let key = alice.notification_address().unwrap().to_string();

    bob.process_received(&notification_tx(&alice, &bob.payment_code(), 0), None)
        .unwrap();
    let stale = bob.channel_for(&key).unwrap();

    let first = send_key(&secp, &alice_account, &bob.payment_code(), 0)
        .unwrap()
        .script_pubkey();
    for i in 0..3 {
        let script = send_key(&secp, &alice_account, &bob.payment_code(), i)
            .unwrap()
            .script_pubkey();
        bob.process_received(&payment_tx(script, 10 + i), None)
            .unwrap();
    }
    bob_backend.add_outpoint(outpoint(1)).unwrap();
    assert_matches!(
        bob.process_sent(&notification_tx(&bob, &alice.payment_code(), 1), None),
        Ok(TxClass::NotificationSent { .. })
    );
    let before = bob.channel_for(&key).unwrap();
    assert_eq!(before.incoming_addresses.len(), 4);
    assert_eq!(before.status, ChannelStatus::Sent);

    let merged = bob.import_channels(vec![stale]).unwrap();

    assert_eq!(merged, 0);
    let after = bob.channel_for(&key).unwrap();
    assert_eq!(after, before);
    assert_eq!(after.current_incoming_index, 3);
    assert!(bob.can_send_to(&alice.payment_code()).unwrap());

    // a replayed payment doesn't derive an index twice
    assert_eq!(
        bob.process_received(&payment_tx(first, 20), None).unwrap(),
        TxClass::DuplicatePayment {
            channel: key.clone()
        }
    );
    assert_eq!(bob.channel_for(&key).unwrap().incoming_addresses.len(), 4);
}

/// Chain source that reads the wallet back while it rolls back
struct ReplayingChain {
    backend: MemoryBackend,
    wallet: Mutex<Weak<Bip47Wallet<Arc<MemoryBackend>, Arc<ReplayingChain>>>>,
    channels_seen: Mutex<Vec<usize>>,
}

impl ChainSource for ReplayingChain {
    fn current_height(&self) -> Result<u32, Error> {
        self.backend.current_height()
    }

    fn rollback_to(&self, height: u32) -> Result<(), Error> {
        if let Some(wallet) = self.wallet.lock().unwrap().upgrade() {
            self.channels_seen
                .lock()
                .unwrap()
                .push(wallet.channels().len());
        }
        self.backend.rollback_to(height)
    }

    fn broadcast(&self, tx: Transaction) -> BoxFuture<'_, Result<Txid, Error>> {
        self.backend.broadcast(tx)
    }
}

#[test]
fn test_rollback_can_call_back_into_the_wallet() {
    let (alice, _) = get_wallet(ALICE);
    let keys = Arc::new(MemoryBackend::new());
    let chain = Arc::new(ReplayingChain {
        backend: MemoryBackend::new(),
        wallet: Mutex::new(Weak::new()),
        channels_seen: Mutex::new(Vec::new()),
    });
    chain.backend.set_height(120).unwrap();

    let bob = Arc::new(
        Bip47Wallet::create(&[BOB; 64], keys, Arc::clone(&chain), (), params()).unwrap(),
    );
    *chain.wallet.lock().unwrap() = Arc::downgrade(&bob);

    assert_matches!(
        bob.process_received(&notification_tx(&alice, &bob.payment_code(), 0), Some(100)),
        Ok(TxClass::Notification {
            rescan: RescanOutcome::RolledBack(98),
            ..
        })
    );
    assert_eq!(*chain.channels_seen.lock().unwrap(), vec![1]);
    assert_eq!(chain.backend.rollbacks().unwrap(), vec![98]);
}

#[test]
fn test_reload_from_file() {
    let secp = Secp256k1::new();
    let alice_account = Account::from_seed(&secp, &[ALICE; 64]).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wallet.bip47");

    let (alice, _) = get_wallet(ALICE);
    let (bob, _) = get_wallet_with_persist(BOB, JsonFileStore::new(&path));
    bob.process_received(&notification_tx(&alice, &bob.payment_code(), 0), None)
        .unwrap();
    let script = send_key(&secp, &alice_account, &bob.payment_code(), 0)
        .unwrap()
        .script_pubkey();
    bob.process_received(&payment_tx(script, 1), None).unwrap();
    let channels = bob.channels();
    drop(bob);

    let backend = Arc::new(MemoryBackend::new());
    let reloaded = Bip47Wallet::load(
        &[BOB; 64],
        Arc::clone(&backend),
        Arc::clone(&backend),
        JsonFileStore::new(&path),
        params(),
    )
    .unwrap();

    assert_eq!(reloaded.channels(), channels);
    for address in &channels[0].incoming_addresses {
        assert!(backend
            .imported_keys()
            .unwrap()
            .iter()
            .any(|k| k.address(NETWORK).to_string() == address.address));
    }

    // the next payment keeps the sequence going
    let script = send_key(&secp, &alice_account, &reloaded.payment_code(), 1)
        .unwrap()
        .script_pubkey();
    assert_matches!(
        reloaded.process_received(&payment_tx(script, 2), None),
        Ok(TxClass::Payment { next_index: 2, .. })
    );
}

#[derive(Debug, Default)]
struct FailingStore;

impl PersistBackend for FailingStore {
    type WriteError = &'static str;
    type LoadError = ();

    fn save(&mut self, _channels: &[Channel]) -> Result<(), Self::WriteError> {
        Err("disk full")
    }

    fn load(&mut self) -> Result<Vec<Channel>, Self::LoadError> {
        Ok(Vec::new())
    }
}

#[test]
fn test_persistence_failure_keeps_memory_state() {
    let (alice, _) = get_wallet(ALICE);
    let (bob, _) = get_wallet_with_persist(BOB, FailingStore);
    let key = alice.notification_address().unwrap().to_string();

    assert_matches!(
        bob.process_received(&notification_tx(&alice, &bob.payment_code(), 0), None),
        Err(Error::PersistenceFailure(_))
    );
    assert_eq!(bob.channel_for(&key).unwrap().incoming_addresses.len(), 1);
}

#[test]
fn test_run_processes_events() {
    let secp = Secp256k1::new();
    let alice_account = Account::from_seed(&secp, &[ALICE; 64]).unwrap();
    let (alice, _) = get_wallet(ALICE);
    let (bob, _) = get_wallet_with_persist(BOB, FailingStore);
    let key = alice.notification_address().unwrap().to_string();

    let script = send_key(&secp, &alice_account, &bob.payment_code(), 0)
        .unwrap()
        .script_pubkey();
    let (sender, receiver) = mpsc::channel();
    sender
        .send(TxEvent::Received {
            tx: notification_tx(&alice, &bob.payment_code(), 0),
            height: None,
        })
        .unwrap();
    sender
        .send(TxEvent::Sent {
            tx: payment_tx(script.clone(), 1),
            height: None,
        })
        .unwrap();
    sender
        .send(TxEvent::Received {
            tx: payment_tx(script, 1),
            height: None,
        })
        .unwrap();
    drop(sender);

    // every save fails, processing goes on
    bob.run(receiver);

    let channel = bob.channel_for(&key).unwrap();
    assert_eq!(channel.incoming_addresses.len(), 2);
    assert!(channel.incoming_addresses[0].seen);
}

#[test]
fn test_random_counterparties() {
    let mut rng = rand::thread_rng();
    let (bob, _) = get_wallet(BOB);

    for vout in 0..3 {
        let mut seed = [0u8; 64];
        rng.fill_bytes(&mut seed);
        let backend = Arc::new(MemoryBackend::new());
        let sender = Bip47Wallet::create(
            &seed,
            Arc::clone(&backend),
            Arc::clone(&backend),
            (),
            params(),
        )
        .unwrap();

        let ntx = notification_tx(&sender, &bob.payment_code(), vout);
        assert_matches!(
            bob.process_received(&ntx, None),
            Ok(TxClass::Notification { payment_code, .. }) if payment_code == sender.payment_code()
        );
    }

    assert_eq!(bob.channels().len(), 3);
}
