use uhs_crypto::{
    encrypt, encrypt_str, encrypt_str_with, CipherKey, KeySchedule, Keystream, TitleKeySchedule,
};

fn make_text(size: usize) -> Vec<u8> {
    // Printable text with a newline every 64 bytes
    (0..size)
        .map(|i| if i % 64 == 63 { b'\n' } else { 0x20 + (i.wrapping_mul(7) % 95) as u8 })
        .collect()
}

fn bench_key() -> CipherKey {
    TitleKeySchedule.derive("The Longest Journey")
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_encrypt(bencher: divan::Bencher, size: usize) {
    let key = bench_key();
    let data = make_text(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| encrypt(divan::black_box(&data), divan::black_box(&key)));
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_encrypt_str(bencher: divan::Bencher, size: usize) {
    let key = bench_key();
    let text = String::from_utf8(make_text(size)).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| encrypt_str(divan::black_box(&text), divan::black_box(&key)));
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_encrypt_text_hunk(bencher: divan::Bencher, size: usize) {
    let key = bench_key();
    let text = String::from_utf8(make_text(size)).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| encrypt_str_with(divan::black_box(&text), divan::black_box(&key), Keystream::TextHunk));
}

#[divan::bench]
fn bench_title_schedule() -> CipherKey {
    TitleKeySchedule.derive(divan::black_box("The Secret of Monkey Island"))
}

fn main() {
    divan::main();
}
