use criterion::{black_box, criterion_group, criterion_main, Criterion};

use burrow_tunnel::crypto::Crypto;
use burrow_tunnel::protocol::{self, Block, BlockType};

fn sample_id() -> [u8; 16] {
    let mut id = [0u8; 16];
    for (i, b) in id.iter_mut().enumerate() {
        *b = i as u8;
    }
    id
}

fn bench_marshal_unmarshal(c: &mut Criterion) {
    let body = vec![0xABu8; 4096];
    let block = Block::with_body(sample_id(), BlockType::Data, body);
    let wire = protocol::marshal(&block);

    c.bench_function("marshal 4096B body", |b| {
        b.iter(|| protocol::marshal(black_box(&block)))
    });

    c.bench_function("unmarshal 4096B body", |b| {
        b.iter(|| protocol::unmarshal(black_box(&wire)).unwrap())
    });
}

fn bench_aes_cbc(c: &mut Criterion) {
    let crypto = Crypto::new(b"benchmark-password").unwrap();
    let plaintext = vec![0x11u8; 4096];
    let ciphertext = crypto.encrypt(&plaintext).unwrap();

    c.bench_function("aes256-cbc encrypt 4096B", |b| {
        b.iter(|| crypto.encrypt(black_box(&plaintext)).unwrap())
    });

    c.bench_function("aes256-cbc decrypt 4096B", |b| {
        b.iter(|| crypto.decrypt(black_box(&ciphertext)).unwrap())
    });
}

criterion_group!(benches, bench_marshal_unmarshal, bench_aes_cbc);
criterion_main!(benches);
