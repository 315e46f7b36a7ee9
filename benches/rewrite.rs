use criterion::{criterion_group, criterion_main, Criterion};

use jvmmon::profiler::filter::FilterConfig;
use jvmmon::profiler::registry::MethodRegistry;
use jvmmon::rewriter::{rewrite_class, RewriteConfig};

fn u2(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn u4(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn utf8(out: &mut Vec<u8>, s: &str) {
    out.push(1);
    u2(out, s.len() as u16);
    out.extend_from_slice(s.as_bytes());
}

/// `com/example/Bench` with `method_count` identical `static int f<n>(int)`
/// bodies, each a small loop with a branch so the rewriter has offsets to
/// remap.
fn build_bench_class(method_count: u16) -> Vec<u8> {
    let mut out = Vec::new();
    u4(&mut out, 0xCAFEBABE);
    u2(&mut out, 0);
    u2(&mut out, 52);

    // pool: this utf8+class, super utf8+class, "Code", desc, method names
    u2(&mut out, 7 + method_count);
    utf8(&mut out, "com/example/Bench"); // 1
    out.push(7);
    u2(&mut out, 1); // 2
    utf8(&mut out, "java/lang/Object"); // 3
    out.push(7);
    u2(&mut out, 3); // 4
    utf8(&mut out, "Code"); // 5
    utf8(&mut out, "(I)I"); // 6
    for i in 0..method_count {
        utf8(&mut out, &format!("f{i}")); // 7 + i
    }

    u2(&mut out, 0x0021);
    u2(&mut out, 2);
    u2(&mut out, 4);
    u2(&mut out, 0); // interfaces
    u2(&mut out, 0); // fields

    u2(&mut out, method_count);
    // countdown loop, then return the argument
    let code: Vec<u8> = vec![
        0x1a, // 0: iload_0
        0x99, 0x00, 0x09, // 1: ifeq -> 10
        0x84, 0x00, 0xff, // 4: iinc local 0 by -1
        0xa7, 0xff, 0xf9, // 7: goto -> 0
        0x1a, 0xac, // 10: iload_0, 11: ireturn
    ];

    for i in 0..method_count {
        u2(&mut out, 0x0009); // public static
        u2(&mut out, 7 + i); // name
        u2(&mut out, 6); // descriptor
        u2(&mut out, 1); // one attribute
        u2(&mut out, 5); // "Code"
        u4(&mut out, (2 + 2 + 4 + code.len() + 2 + 2) as u32);
        u2(&mut out, 2); // max_stack
        u2(&mut out, 1); // max_locals
        u4(&mut out, code.len() as u32);
        out.extend_from_slice(&code);
        u2(&mut out, 0); // exception table
        u2(&mut out, 0); // code attributes
    }

    u2(&mut out, 0); // class attributes
    out
}

fn bench_rewrite(c: &mut Criterion) {
    let bytes = build_bench_class(64);
    let filter = FilterConfig::new(vec!["com.example.*"], Vec::new()).unwrap();
    let config = RewriteConfig::default();

    c.bench_function("rewrite_64_methods", |b| {
        b.iter(|| {
            let registry = MethodRegistry::new();
            rewrite_class(&bytes, &filter, &registry, &config)
                .unwrap()
                .unwrap()
        })
    });

    c.bench_function("parse_only_no_match", |b| {
        let registry = MethodRegistry::new();
        let miss = FilterConfig::new(vec!["org.other.*"], Vec::new()).unwrap();
        b.iter(|| rewrite_class(&bytes, &miss, &registry, &config).unwrap())
    });
}

criterion_group!(benches, bench_rewrite);
criterion_main!(benches);
