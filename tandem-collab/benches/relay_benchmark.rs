use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tandem_collab::protocol::{ParticipantRole, PeerInfo, RelayMessage, RoomUpdate};
use tandem_collab::room::RoomChannel;
use std::sync::Arc;
use uuid::Uuid;

fn bench_frame_encode(c: &mut Criterion) {
    let peer = Uuid::new_v4();
    let update = RoomUpdate::Code("fn main() { println!(\"hi\"); }".to_string());

    c.bench_function("frame_encode_code_update", |b| {
        b.iter(|| {
            let msg = RelayMessage::update(black_box(peer), black_box("abc123"), black_box(&update));
            black_box(msg.encode().unwrap());
        })
    });
}

fn bench_frame_decode(c: &mut Criterion) {
    let peer = Uuid::new_v4();
    let update = RoomUpdate::Pad("<p>shared notes</p>".to_string());
    let msg = RelayMessage::update(peer, "abc123", &update);
    let encoded = msg.encode().unwrap();

    c.bench_function("frame_decode_pad_update", |b| {
        b.iter(|| {
            black_box(RelayMessage::decode(black_box(&encoded)).unwrap());
        })
    });
}

fn bench_room_fan_out(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let channel = RoomChannel::new(4096);
    let mut receivers = Vec::new();
    rt.block_on(async {
        for i in 0..100 {
            let info = PeerInfo::new(format!("Peer{i}"), ParticipantRole::Interviewer);
            receivers.push(channel.join(info).await);
        }
    });

    let peer = Uuid::new_v4();
    let msg = RelayMessage::update(peer, "bench", &RoomUpdate::Code("x = 1".to_string()));
    let encoded = Arc::new(msg.encode().unwrap());

    c.bench_function("fan_out_100_members", |b| {
        b.iter(|| {
            black_box(channel.relay_raw(encoded.clone()));
        })
    });
}

criterion_group!(
    benches,
    bench_frame_encode,
    bench_frame_decode,
    bench_room_fan_out
);
criterion_main!(benches);
