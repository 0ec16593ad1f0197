//! Benchmark crate for rstomp. See `benches/`.
