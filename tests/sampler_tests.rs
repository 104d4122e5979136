mod common;

use common::ScriptedProbe;
use voltnode::sampler::*;

#[test]
fn test_disconnected_probe_keeps_last_good_value() {
    let mut sampler = TemperatureSampler::new(20.0);
    let mut probe = ScriptedProbe::new(&[25.0, DISCONNECTED_C, DISCONNECTED_C, 26.0]);

    let mut published = Vec::new();
    for second in 1..=4u64 {
        sampler.sample(second * 1000, &mut probe);
        published.push(sampler.temperature());
    }

    assert_eq!(published, vec![25.0, 25.0, 25.0, 26.0]);
    assert_eq!(sampler.state().total_faults, 2);
    assert_eq!(sampler.state().consecutive_faults, 0);
}

#[test]
fn test_sample_outcomes() {
    let mut sampler = TemperatureSampler::new(20.0);
    let mut probe = ScriptedProbe::new(&[25.5, DISCONNECTED_C]);

    assert_eq!(sampler.sample(500, &mut probe), SampleOutcome::Skipped);
    assert_eq!(sampler.sample(1000, &mut probe), SampleOutcome::Updated(25.5));
    assert_eq!(sampler.sample(2000, &mut probe), SampleOutcome::Disconnected);
    assert_eq!(sampler.state().consecutive_faults, 1);
}

#[test]
fn test_bus_untouched_between_samples() {
    let mut sampler = TemperatureSampler::new(20.0);
    let mut probe = ScriptedProbe::new(&[25.0]);

    for now in (0..1000).step_by(10) {
        assert_eq!(sampler.sample(now, &mut probe), SampleOutcome::Skipped);
    }
    assert_eq!(probe.conversions, 0);
    assert_eq!(sampler.temperature(), 20.0);

    sampler.sample(1000, &mut probe);
    assert_eq!(probe.conversions, 1);
}

#[test]
fn test_failed_sample_still_resets_the_gate() {
    let mut sampler = TemperatureSampler::new(20.0);
    let mut probe = ScriptedProbe::new(&[DISCONNECTED_C, 24.0]);

    assert_eq!(sampler.sample(1000, &mut probe), SampleOutcome::Disconnected);
    assert_eq!(sampler.state().last_sample_ms, 1000);

    // Not retried early
    assert_eq!(sampler.sample(1500, &mut probe), SampleOutcome::Skipped);
    assert_eq!(sampler.sample(2000, &mut probe), SampleOutcome::Updated(24.0));
}

#[test]
fn test_initial_value_survives_dead_probe() {
    let mut sampler = TemperatureSampler::new(25.0);
    let mut probe = ScriptedProbe::new(&[DISCONNECTED_C]);

    for second in 1..=10u64 {
        sampler.sample(second * 1000, &mut probe);
    }
    assert_eq!(sampler.temperature(), 25.0);
    assert_eq!(sampler.state().consecutive_faults, 10);
}

#[test]
fn test_custom_interval() {
    let mut sampler = TemperatureSampler::new(20.0).with_interval(250);
    let mut probe = ScriptedProbe::new(&[21.0, 22.0]);

    assert_eq!(sampler.sample(250, &mut probe), SampleOutcome::Updated(21.0));
    assert_eq!(sampler.sample(400, &mut probe), SampleOutcome::Skipped);
    assert_eq!(sampler.sample(500, &mut probe), SampleOutcome::Updated(22.0));
}
