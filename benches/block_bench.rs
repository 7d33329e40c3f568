use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use blockdata::block::encode_frame;
use blockdata::{BlockFileReader, BlockFileWriter, BlockId, Crc32, RecoveryReader};
use std::io::Cursor;

const BLOCKS: usize = 1024;
const PAYLOAD: usize = 1024;

fn sample_file() -> Vec<u8> {
    let writer = BlockFileWriter::new(Vec::new()).unwrap();
    let payload = vec![42u8; PAYLOAD];
    for i in 0..BLOCKS {
        writer.write_block(&BlockId::new(2049, 1, 0, i as u16), &payload).unwrap();
    }
    writer.finish().unwrap()
}

fn bench_crc(c: &mut Criterion) {
    let id = BlockId::new(2049, 2, 3, 14);
    let payload = vec![7u8; 64 * 1024];

    let mut group = c.benchmark_group("crc");
    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("block_crc_64k", |b| b.iter(|| Crc32::of_block(black_box(&id), black_box(&payload))));
    group.bench_function("encode_frame_64k", |b| b.iter(|| encode_frame(black_box(&id), black_box(&payload))));
    group.finish();
}

fn bench_write(c: &mut Criterion) {
    let payload = vec![42u8; PAYLOAD];

    let mut group = c.benchmark_group("write");
    group.throughput(Throughput::Bytes((BLOCKS * PAYLOAD) as u64));
    group.bench_function("write_1k_blocks", |b| {
        b.iter(|| {
            let writer = BlockFileWriter::new(Vec::with_capacity(BLOCKS * (PAYLOAD + 14))).unwrap();
            for i in 0..BLOCKS {
                writer.write_block(&BlockId::new(2049, 1, 0, i as u16), black_box(&payload)).unwrap();
            }
            writer.finish().unwrap()
        })
    });
    group.finish();
}

fn bench_read(c: &mut Criterion) {
    let file = sample_file();

    let mut group = c.benchmark_group("read");
    group.throughput(Throughput::Bytes(file.len() as u64));
    group.bench_function("read_1k_blocks", |b| {
        b.iter(|| {
            let mut reader: BlockFileReader<Cursor<&[u8]>> = BlockFileReader::new();
            reader.open_stream(Cursor::new(black_box(&file[..]))).unwrap();
            reader.process_all().unwrap()
        })
    });
    group.bench_function("recovery_read_1k_blocks_clean", |b| {
        b.iter(|| {
            let mut reader: RecoveryReader<Cursor<&[u8]>> = RecoveryReader::new();
            reader.open_stream(Cursor::new(black_box(&file[..]))).unwrap();
            reader.process_all().unwrap()
        })
    });
    group.finish();
}

criterion_group!(benches, bench_crc, bench_write, bench_read);
criterion_main!(benches);
