use voltnode::codec::{self, WordPair};

#[test]
fn test_big_endian_word_order() {
    assert_eq!(codec::encode(25.0), WordPair::new(0x41C8, 0x0000));
    assert_eq!(codec::encode(24.1), WordPair::new(0x41C0, 0xCCCD));
    assert_eq!(codec::encode(-127.0), WordPair::new(0xC2FE, 0x0000));
    assert_eq!(codec::decode(WordPair::new(0x41F0, 0x0000)), 30.0);
}

#[test]
fn test_special_values_survive_bit_exact() {
    let specials = [
        0.0f32,
        -0.0,
        f32::MIN_POSITIVE,
        f32::from_bits(0x0000_0001), // smallest subnormal
        f32::from_bits(0x807F_FFFF), // largest negative subnormal
        f32::MAX,
        f32::MIN,
        f32::INFINITY,
        f32::NEG_INFINITY,
        f32::from_bits(0x7FC0_0000),
        f32::from_bits(0x7FC0_1234), // quiet NaN with payload
        f32::from_bits(0xFFFF_FFFF),
    ];

    for value in specials {
        let decoded = codec::decode(codec::encode(value));
        assert_eq!(
            decoded.to_bits(),
            value.to_bits(),
            "bit pattern 0x{:08X} changed",
            value.to_bits()
        );
    }
}

#[test]
fn test_negative_zero_keeps_sign() {
    let pair = codec::encode(-0.0);
    assert_eq!(pair, WordPair::new(0x8000, 0x0000));
    assert!(codec::decode(pair).is_sign_negative());
}

#[test]
fn test_sampled_bit_patterns() {
    // Linear congruential walk over the 32-bit space
    let mut bits: u32 = 0x1234_5678;
    for _ in 0..20_000 {
        bits = bits.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        let pair = codec::encode_bits(bits);
        assert_eq!(codec::decode_bits(pair), bits);
        assert_eq!(u32::from(pair.high), bits >> 16);
        assert_eq!(u32::from(pair.low), bits & 0xFFFF);
    }
}

#[test]
fn test_word_pair_array_order() {
    let pair = codec::encode(24.0);
    assert_eq!(pair.to_array(), [0x41C0, 0x0000]);
    assert_eq!(WordPair::from_array(pair.to_array()), pair);
}

#[test]
fn test_decode_slice_needs_two_words() {
    assert_eq!(codec::decode_slice(&[0x41C8]), None);
    assert_eq!(codec::decode_slice(&[]), None);
    assert_eq!(codec::decode_slice(&[0x41C8, 0x0000, 0xFFFF]), Some(25.0));
}
