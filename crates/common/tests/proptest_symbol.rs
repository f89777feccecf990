use common::symbol::{from_exchange, to_exchange};
use proptest::prelude::*;

proptest! {
    /// Translation must be lossless for arbitrary pairs, mapped or not.
    #[test]
    fn symbol_round_trips_through_exchange_format(
        base in prop_oneof![
            Just("BTC".to_string()),
            Just("XBT".to_string()),
            Just("DOGE".to_string()),
            Just("XDG".to_string()),
            "[A-Z0-9]{1,6}",
        ],
        quote in prop_oneof![
            Just("USDT".to_string()),
            Just("BTC".to_string()),
            Just("XBT".to_string()),
            "[A-Z0-9]{1,6}",
        ],
    ) {
        let symbol = format!("{base}/{quote}");
        prop_assert_eq!(from_exchange(&to_exchange(&symbol)), symbol.clone());
        prop_assert_eq!(to_exchange(&from_exchange(&symbol)), symbol);
    }

    /// Arbitrary strings, including ones without a slash, survive too.
    #[test]
    fn arbitrary_strings_round_trip(raw in ".{0,24}") {
        prop_assert_eq!(from_exchange(&to_exchange(&raw)), raw);
    }
}
