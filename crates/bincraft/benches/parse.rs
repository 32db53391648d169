use bincraft::{
    ConstructRef, field, primitives::Bytes, structs::Struct, this, u8, u16_be, u32_le,
};
use criterion::{Criterion, criterion_group, criterion_main};

fn gen_format(field_count: usize) -> Struct {
    let mut fields: Vec<ConstructRef> = Vec::with_capacity(field_count * 2);

    for i in 0..field_count {
        let child = match i % 3 {
            0 => u8(),
            1 => u16_be(),
            _ => u32_le(),
        };
        fields.push(field(format!("f{}", i), child));
    }
    fields.push(field("len", u8()));
    fields.push(field("tail", Bytes::new(this("len"))));

    Struct::new(fields)
}

fn gen_packet(field_count: usize) -> Vec<u8> {
    let head: usize = (0..field_count).map(|i| [1, 2, 4][i % 3]).sum();
    let mut data = Vec::with_capacity(head + 17);

    // Deterministic but non-trivial pattern
    for i in 0..head {
        data.push((i * 31 % 256) as u8);
    }
    data.push(16);
    data.extend(std::iter::repeat_n(0xAB, 16));

    data
}

fn bench_struct_parse(c: &mut Criterion) {
    for &field_count in &[1usize, 10, 50, 100] {
        let format = gen_format(field_count);
        let packet = gen_packet(field_count);

        c.bench_function(&format!("parse_{}_fields", field_count), |b| {
            b.iter(|| {
                let _ = bincraft::parse(&format, &packet).unwrap();
            })
        });
    }
}

fn bench_struct_build(c: &mut Criterion) {
    for &field_count in &[1usize, 10, 50, 100] {
        let format = gen_format(field_count);
        let value = bincraft::parse(&format, &gen_packet(field_count)).unwrap();

        c.bench_function(&format!("build_{}_fields", field_count), |b| {
            b.iter(|| {
                let _ = bincraft::build(&format, &value).unwrap();
            })
        });
    }
}

criterion_group!(benches, bench_struct_parse, bench_struct_build);
criterion_main!(benches);
