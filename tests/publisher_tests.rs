use voltnode::codec;
use voltnode::publisher::*;
use voltnode::registers::{RegisterBank, RegisterError, RegisterPair, REG_TEMPERATURE, REG_VOLTAGE};

fn setup() -> (RegisterBank, Publisher) {
    let mut bank = RegisterBank::new();
    bank.allocate_pair(RegisterPair(REG_VOLTAGE)).unwrap();
    bank.allocate_pair(RegisterPair(REG_TEMPERATURE)).unwrap();
    let publisher = Publisher::new(RegisterPair(REG_VOLTAGE), RegisterPair(REG_TEMPERATURE));
    (bank, publisher)
}

#[test]
fn test_first_publish_always_traces() {
    let (mut bank, mut publisher) = setup();
    let trace = publisher.publish(&mut bank, 24.0, 25.0).unwrap();

    assert_eq!(
        trace.as_deref(),
        Some("Voltage = 24.00 V | Temperature = 25.00 °C")
    );
    assert_eq!(bank.read(0).unwrap(), 0x41C0);
    assert_eq!(bank.read(1).unwrap(), 0x0000);
    assert_eq!(bank.read(4).unwrap(), 0x41C8);
    assert_eq!(bank.read(5).unwrap(), 0x0000);
}

#[test]
fn test_unchanged_values_are_published_but_not_traced() {
    let (mut bank, mut publisher) = setup();
    publisher.publish(&mut bank, 24.0, 25.0).unwrap();

    // A client scribbled over the pair; the next publish restores it silently
    bank.write_f32(RegisterPair(REG_VOLTAGE), 28.0).unwrap();
    let trace = publisher.publish(&mut bank, 24.0, 25.0).unwrap();

    assert!(trace.is_none());
    assert_eq!(bank.read_f32(RegisterPair(REG_VOLTAGE)).unwrap(), 24.0);
    assert_eq!(publisher.publish_count(), 2);
}

#[test]
fn test_trace_threshold() {
    let (mut bank, mut publisher) = setup();
    publisher.publish(&mut bank, 24.0, 25.0).unwrap();

    assert!(publisher.publish(&mut bank, 24.005, 25.0).unwrap().is_none());
    assert!(publisher.publish(&mut bank, 24.0, 25.008).unwrap().is_none());
    assert!(publisher.publish(&mut bank, 24.1, 25.0).unwrap().is_some());
    assert!(publisher.publish(&mut bank, 24.1, 25.5).unwrap().is_some());

    // The sub-threshold value still reached the registers
    publisher.publish(&mut bank, 24.105, 25.5).unwrap();
    assert_eq!(bank.read_f32(RegisterPair(REG_VOLTAGE)).unwrap(), 24.105);
}

#[test]
fn test_trace_compares_against_last_traced_value() {
    let (mut bank, mut publisher) = setup();
    publisher.publish(&mut bank, 24.0, 25.0).unwrap();

    // Creeping drift below the threshold per step eventually traces
    assert!(publisher.publish(&mut bank, 24.006, 25.0).unwrap().is_none());
    assert!(publisher.publish(&mut bank, 24.012, 25.0).unwrap().is_some());
}

#[test]
fn test_publish_preserves_bit_pattern() {
    let (mut bank, mut publisher) = setup();
    publisher.publish(&mut bank, 24.1, -0.0).unwrap();

    let voltage = bank.read_pair(RegisterPair(REG_VOLTAGE)).unwrap();
    let temperature = bank.read_pair(RegisterPair(REG_TEMPERATURE)).unwrap();
    assert_eq!(voltage, codec::encode(24.1));
    assert_eq!(codec::decode(temperature).to_bits(), (-0.0f32).to_bits());
}

#[test]
fn test_publish_into_unallocated_bank_fails() {
    let mut bank = RegisterBank::new();
    let mut publisher = Publisher::new(RegisterPair(REG_VOLTAGE), RegisterPair(REG_TEMPERATURE));
    assert_eq!(
        publisher.publish(&mut bank, 24.0, 25.0),
        Err(RegisterError::Unallocated(REG_VOLTAGE))
    );
}

#[test]
fn test_format_trace() {
    assert_eq!(
        format_trace(22.5, -3.25).as_str(),
        "Voltage = 22.50 V | Temperature = -3.25 °C"
    );
    // Extreme values still fit the fixed-capacity line
    let line = format_trace(f32::MAX, f32::MIN);
    assert!(line.starts_with("Voltage = "));
}
