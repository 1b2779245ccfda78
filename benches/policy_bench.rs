use criterion::{black_box, criterion_group, criterion_main, Criterion};
use faceguard::facts::{
    BlurFacts, BrightnessFacts, ContrastFacts, NoiseFacts, ObjectiveFacts, RawAssessment,
    ResolutionFacts, ScoreBuilder,
};
use faceguard::learner::{build_from, parser};
use faceguard::policy::{LearnedPolicy, PolicyConfig, PolicyEngine, Profile};
use std::fmt::Write;

fn degraded() -> RawAssessment {
    RawAssessment {
        objective: Some(ObjectiveFacts {
            blur: Some(BlurFacts {
                variance: Some(12.0),
            }),
            brightness: Some(BrightnessFacts {
                mean: Some(35.0),
                std: Some(20.0),
            }),
            contrast: Some(ContrastFacts {
                std: Some(20.0),
                spread: Some(60.0),
            }),
            noise: Some(NoiseFacts {
                psnr: Some(24.0),
                noise: Some(7.0),
            }),
            resolution: Some(ResolutionFacts {
                width: Some(480),
                height: Some(360),
            }),
        }),
        ..Default::default()
    }
}

/// A case log with `steps` guard reports.
fn synthetic_log(steps: usize) -> String {
    let kinds = ["deblur", "brightness", "contrast", "denoise"];
    let mut s = String::new();
    writeln!(s, "[CASE] Started CASE_0001 | mode=forensic").unwrap();
    writeln!(s, "[GUARD]      • Baseline similarity : 80.00").unwrap();
    writeln!(s, "[GUARD]      • Baseline score      : 0.7000").unwrap();
    for i in 0..steps {
        let kind = kinds[i % kinds.len()];
        let after = 78.0 + (i % 5) as f64;
        writeln!(s, "[PIPELINE] Step #{} | action={kind} | strength=medium | model=M", i + 1).unwrap();
        writeln!(s, "[GUARD]         ENHANCEMENT STEP REPORT : {}", kind.to_uppercase()).unwrap();
        writeln!(s, "[GUARD]      • Model used      : M").unwrap();
        writeln!(s, "[GUARD]      • Processing time     : 12.00 ms").unwrap();
        writeln!(s, "[GUARD]      • Before similarity   : 80.00").unwrap();
        writeln!(s, "[GUARD]      • After similarity    : {after:.2}").unwrap();
        writeln!(s, "[GUARD]      • Final decision      : {}", if after >= 79.5 { "ACCEPTED" } else { "REJECTED" }).unwrap();
        writeln!(s, "[GUARD]               STEP EVALUATION COMPLETE").unwrap();
    }
    s
}

fn bench_score_builder(c: &mut Criterion) {
    let raw = degraded();
    c.bench_function("ScoreBuilder::build(degraded)", |b| {
        b.iter(|| ScoreBuilder.build(black_box(&raw)));
    });
}

fn bench_evaluate(c: &mut Criterion) {
    let facts = ScoreBuilder.build(&degraded());
    let plain = PolicyEngine::with_learned(PolicyConfig::default(), None);
    c.bench_function("evaluate(forensic)", |b| {
        b.iter(|| plain.evaluate(black_box(&facts), Profile::Forensic, 1));
    });
    c.bench_function("evaluate(enhancement, round 1)", |b| {
        b.iter(|| plain.evaluate(black_box(&facts), Profile::Enhancement, 1));
    });

    let learned = LearnedPolicy {
        bad_actions: ["denoise".to_string()].into_iter().collect(),
        recommended_priorities: [("brightness".to_string(), 1), ("deblur".to_string(), 2)]
            .into_iter()
            .collect(),
        ..Default::default()
    };
    let filtered = PolicyEngine::with_learned(PolicyConfig::default(), Some(learned));
    c.bench_function("evaluate(forensic, learned)", |b| {
        b.iter(|| filtered.evaluate(black_box(&facts), Profile::Forensic, 1));
    });
}

fn bench_parser(c: &mut Criterion) {
    let small = synthetic_log(4);
    let large = synthetic_log(200);
    c.bench_function("parse(4 steps)", |b| {
        b.iter(|| parser::parse(black_box(&small)));
    });
    c.bench_function("parse(200 steps)", |b| {
        b.iter(|| parser::parse(black_box(&large)));
    });
}

fn bench_build_policy(c: &mut Criterion) {
    let corpus: Vec<_> = (0..100).map(|_| parser::parse(&synthetic_log(6))).collect();
    c.bench_function("build_from(100 cases)", |b| {
        b.iter(|| build_from(black_box(&corpus)));
    });
}

criterion_group!(
    benches,
    bench_score_builder,
    bench_evaluate,
    bench_parser,
    bench_build_policy
);
criterion_main!(benches);
