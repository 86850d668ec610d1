use fhe_msr::generate_main;
use fhe_msr::he::noise_tracker::NoiseTrackerParams;

// 8192 slots, with three levels left after the MSR.
generate_main!(NoiseTrackerParams::N16384);
