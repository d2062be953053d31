#![allow(unused)]
use std::str::FromStr;
use std::sync::Arc;

use bdk_bip47::bitcoin::script::{Builder, PushBytesBuf};
use bdk_bip47::bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use bdk_bip47::bitcoin::{
    absolute, transaction, Amount, Network, OutPoint, ScriptBuf, Sequence, Transaction, TxIn,
    TxOut, Txid, Witness,
};
use bdk_bip47::{Bip47Params, Bip47Wallet, MemoryBackend, PersistBackend};

pub type TestWallet<P = ()> = Bip47Wallet<Arc<MemoryBackend>, Arc<MemoryBackend>, P>;

pub const NETWORK: Network = Network::Regtest;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn params() -> Bip47Params {
    Bip47Params::new().network(NETWORK)
}

/// Return a wallet with no channels built from a seed made of `seed` bytes, along with the
/// backend it uses as both key store and chain.
pub fn get_wallet(seed: u8) -> (TestWallet, Arc<MemoryBackend>) {
    get_wallet_with_persist(seed, ())
}

pub fn get_wallet_with_persist<P: PersistBackend>(
    seed: u8,
    persist: P,
) -> (TestWallet<P>, Arc<MemoryBackend>) {
    init_logger();

    let backend = Arc::new(MemoryBackend::new());
    let wallet = Bip47Wallet::create(
        &[seed; 64],
        Arc::clone(&backend),
        Arc::clone(&backend),
        persist,
        params(),
    )
    .unwrap();

    (wallet, backend)
}

pub fn outpoint(vout: u32) -> OutPoint {
    OutPoint {
        txid: Txid::from_str("e7e3b2e8b5f0d4a1c1c9e5b2e7d6b43b0f1e6a6c9e7b1a4d3c2b1a0f9e8d7c6b")
            .unwrap(),
        vout,
    }
}

/// The secret key spending `outpoint(vout)`
pub fn input_key(vout: u32) -> SecretKey {
    let mut bytes = [0x11; 32];
    bytes[31] = vout as u8;
    SecretKey::from_slice(&bytes).unwrap()
}

/// Fake P2PKH `script_sig` exposing the public key of `key`
pub fn p2pkh_script_sig(key: &SecretKey) -> ScriptBuf {
    let secp = Secp256k1::new();
    let sig = PushBytesBuf::try_from(vec![0x30; 71]).unwrap();

    Builder::new()
        .push_slice(&sig)
        .push_key(&bdk_bip47::bitcoin::PublicKey::new(PublicKey::from_secret_key(
            &secp, key,
        )))
        .into_script()
}

pub fn new_tx(input: Vec<TxIn>, output: Vec<TxOut>) -> Transaction {
    Transaction {
        version: transaction::Version::ONE,
        lock_time: absolute::LockTime::ZERO,
        input,
        output,
    }
}

pub fn p2pkh_input(vout: u32) -> TxIn {
    TxIn {
        previous_output: outpoint(vout),
        script_sig: p2pkh_script_sig(&input_key(vout)),
        sequence: Sequence::MAX,
        witness: Witness::default(),
    }
}

/// Build the notification transaction `sender` sends to `recipient`, spending `outpoint(vout)`
pub fn notification_tx<P: PersistBackend>(
    sender: &TestWallet<P>,
    recipient: &bdk_bip47::PaymentCode,
    vout: u32,
) -> Transaction {
    let output = sender
        .notification_outputs(recipient, &input_key(vout), &outpoint(vout))
        .unwrap();

    new_tx(vec![p2pkh_input(vout)], output)
}

/// A transaction paying 50_000 sats to `script`
pub fn payment_tx(script: ScriptBuf, vout: u32) -> Transaction {
    new_tx(
        vec![p2pkh_input(vout)],
        vec![TxOut {
            value: Amount::from_sat(50_000),
            script_pubkey: script,
        }],
    )
}
