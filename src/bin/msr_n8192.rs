use fhe_msr::generate_main;
use fhe_msr::he::noise_tracker::NoiseTrackerParams;

// 4096 slots: e.g. 64x64 in one ciphertext, 200x50 in three shards.
generate_main!(NoiseTrackerParams::N8192);
