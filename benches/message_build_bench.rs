//! Message compilation, signing and wire encoding
//!
//! Benchmarks:
//! - Compiling instructions into a message as account count grows
//! - Signing and serializing a compiled message
//! - Decoding wire bytes back into a transaction

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use soltx::{AccountMeta, Hash, Instruction, Keypair, Message, Pubkey, Signer, Transaction};

/// One instruction per account, alternating writable and read-only
fn instructions(payer: &Keypair, accounts: usize) -> Vec<Instruction> {
    (0..accounts)
        .map(|i| {
            let key = Pubkey::new_from_array([(i % 250) as u8 + 1; 32]);
            let meta = if i % 2 == 0 {
                AccountMeta::new(key, false)
            } else {
                AccountMeta::new_readonly(key, false)
            };
            Instruction::new_with_bytes(
                Pubkey::new_from_array([0xf0 + (i % 4) as u8; 32]),
                &(i as u64).to_le_bytes(),
                vec![AccountMeta::new(payer.pubkey(), true), meta],
            )
        })
        .collect()
}

fn bench_compile(c: &mut Criterion) {
    let payer = Keypair::from_seed(&[7; 32]);
    let blockhash = Hash::new_from_array([1; 32]);
    let mut group = c.benchmark_group("compile_message");

    for accounts in [1usize, 8, 32] {
        let ixs = instructions(&payer, accounts);
        group.bench_with_input(BenchmarkId::from_parameter(accounts), &ixs, |b, ixs| {
            b.iter(|| Message::new_with_blockhash(black_box(ixs), &payer.pubkey(), &blockhash).unwrap());
        });
    }
    group.finish();
}

fn bench_sign_and_serialize(c: &mut Criterion) {
    let payer = Keypair::from_seed(&[7; 32]);
    let message = Message::new_with_blockhash(&instructions(&payer, 8), &payer.pubkey(), &Hash::default()).unwrap();

    c.bench_function("sign_and_serialize", |b| {
        b.iter(|| {
            let tx = Transaction::new_signed(black_box(message.clone()), &[&payer]).unwrap();
            black_box(tx.serialize().unwrap())
        });
    });
}

fn bench_deserialize(c: &mut Criterion) {
    let payer = Keypair::from_seed(&[7; 32]);
    let message = Message::new_with_blockhash(&instructions(&payer, 8), &payer.pubkey(), &Hash::default()).unwrap();
    let wire = Transaction::new_signed(message, &[&payer]).unwrap().serialize().unwrap();

    c.bench_function("deserialize_transaction", |b| {
        b.iter(|| Transaction::deserialize(black_box(&wire)).unwrap());
    });
}

criterion_group!(benches, bench_compile, bench_sign_and_serialize, bench_deserialize);
criterion_main!(benches);
