//! zkledger - Binary Entry Point
//!
//! Runs a small scripted session against an in-memory store: two
//! deposits, a resting order, a crossing order, and the resulting
//! settlement, printing the state root after each step.

use ed25519_dalek::SigningKey;

use zkledger::types::amount::to_fixed;
use zkledger::types::TxType;
use zkledger::{auth, AssetPair, ChainConfig, MemoryKv, Operation, Side, StateMachine};

const OPERATOR: [u8; 20] = [0xAA; 20];

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "zkledger=info".into()),
        )
        .init();

    let config = ChainConfig::new(vec![OPERATOR], Vec::new());
    let mut machine = StateMachine::new(MemoryKv::new(), config).expect("fresh store");
    println!("genesis root: {}", hex::encode(machine.root()));

    // Fixed demo keys so the session is reproducible.
    let maker_key = SigningKey::from_bytes(&[0x11; 32]);
    let taker_key = SigningKey::from_bytes(&[0x22; 32]);

    // Bridge deposits create the two user accounts.
    machine
        .apply(Operation::Deposit {
            chain_id: 1,
            priority_id: 0,
            operator: OPERATOR,
            eth_address: [1u8; 20],
            l2_address: [1u8; 32],
            token_id: 1,
            amount: "50".to_string(),
        })
        .expect("maker deposit");
    machine
        .apply(Operation::Deposit {
            chain_id: 1,
            priority_id: 1,
            operator: OPERATOR,
            eth_address: [2u8; 20],
            l2_address: [2u8; 32],
            token_id: 2,
            amount: "10000".to_string(),
        })
        .expect("taker deposit");
    let maker = machine
        .tree()
        .account_by_address(&[1u8; 20], &[1u8; 32])
        .expect("index read")
        .expect("maker account");
    let taker = machine
        .tree()
        .account_by_address(&[2u8; 20], &[2u8; 32])
        .expect("index read")
        .expect("taker account");
    println!("accounts: maker={maker} taker={taker}");
    println!("after deposits: {}", hex::encode(machine.root()));

    for (account, key) in [(maker, &maker_key), (taker, &taker_key)] {
        machine
            .apply(Operation::SetPublicKey {
                account_id: account,
                new_key: auth::public_key(key),
                as_proxy: false,
                signature: [0u8; 64],
            })
            .expect("initial key set");
    }

    // Maker sells 50 of token 1 at 100; taker lifts the whole offer.
    let pair = AssetPair::new(1, 2);
    place(&mut machine, &maker_key, maker, pair, Side::Sell, "100", "50");
    let infos = place(&mut machine, &taker_key, taker, pair, Side::Buy, "100", "50");

    println!("after trade: {}", hex::encode(machine.root()));
    println!("operation records: {}", infos.len());
    for info in &infos {
        println!(
            "  op_index={} tx_type={:?} token={} amount={}",
            info.op_index, info.tx_type, info.token_id, info.amount
        );
    }
    println!(
        "maker now holds {} of token 2",
        machine
            .tree()
            .token_balance(maker, 2)
            .expect("balance read")
    );
    println!(
        "taker now holds {} of token 1",
        machine
            .tree()
            .token_balance(taker, 1)
            .expect("balance read")
    );
}

fn place(
    machine: &mut StateMachine<MemoryKv>,
    key: &SigningKey,
    account_id: u32,
    pair: AssetPair,
    side: Side,
    price: &str,
    quantity: &str,
) -> Vec<zkledger::OperationInfo> {
    let mut aux = Vec::new();
    aux.extend_from_slice(&pair.left.to_be_bytes());
    aux.extend_from_slice(&pair.right.to_be_bytes());
    aux.push(side.to_u8());
    aux.extend_from_slice(&to_fixed(price).expect("price").to_be_bytes());
    let msg = auth::encode_message(
        TxType::PlaceOrder,
        account_id,
        pair.left,
        to_fixed(quantity).expect("quantity"),
        0,
        &aux,
    );
    machine
        .apply(Operation::PlaceOrder {
            account_id,
            pair,
            side,
            price: price.to_string(),
            quantity: quantity.to_string(),
            signature: auth::sign(key, &msg),
        })
        .expect("order accepted")
}
