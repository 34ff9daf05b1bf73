//! Wire version negotiation (C3): maps the server's advertised `maxWireVersion` integer to the
//! closed enumeration of protocol levels named in spec §3, and exposes the capability flags that
//! gate which commands/framings the core is allowed to use.

use std::fmt;

use bitflags::bitflags;

/// A totally ordered value drawn from the closed enumeration in spec §3. Comparison is by the
/// numeric protocol level, not by declaration order.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[non_exhaustive]
pub enum WireVersion {
    V3_0,
    V3_2,
    V3_4,
    V3_6,
    V4_0,
    V4_2,
    V5_0,
    V5_1,
    V6_0,
    V7_0,
    V7_1,
    V7_2,
    V7_3,
    V8_0,
}

impl WireVersion {
    /// The numeric protocol level the server advertises for this version, per spec §3's mapping
    /// table. Ordering of [`WireVersion`] must agree with ordering of this numeral.
    pub const fn level(self) -> i32 {
        match self {
            WireVersion::V3_0 => 3,
            WireVersion::V3_2 => 4,
            WireVersion::V3_4 => 5,
            WireVersion::V3_6 => 6,
            WireVersion::V4_0 => 7,
            WireVersion::V4_2 => 8,
            WireVersion::V5_0 => 13,
            WireVersion::V5_1 => 14,
            WireVersion::V6_0 => 17,
            WireVersion::V7_0 => 21,
            WireVersion::V7_1 => 22,
            WireVersion::V7_2 => 23,
            WireVersion::V7_3 => 24,
            WireVersion::V8_0 => 25,
        }
    }

    /// Coerces an arbitrary integer (as reported by `hello`/`isMaster`) to the nearest known
    /// version, rounding *down*. Anything below the 3.2 threshold (numeric level 4) is treated as
    /// 3.0, per spec §3.
    pub fn coerce(max_wire_version: i32) -> Self {
        const TABLE: &[(i32, WireVersion)] = &[
            (25, WireVersion::V8_0),
            (24, WireVersion::V7_3),
            (23, WireVersion::V7_2),
            (22, WireVersion::V7_1),
            (21, WireVersion::V7_0),
            (17, WireVersion::V6_0),
            (14, WireVersion::V5_1),
            (13, WireVersion::V5_0),
            (8, WireVersion::V4_2),
            (7, WireVersion::V4_0),
            (6, WireVersion::V3_6),
            (5, WireVersion::V3_4),
            (4, WireVersion::V3_2),
        ];
        for (level, version) in TABLE {
            if max_wire_version >= *level {
                return *version;
            }
        }
        WireVersion::V3_0
    }

    /// The capability flags implied by this wire version.
    pub fn capabilities(self) -> WireCapabilities {
        let mut caps = WireCapabilities::empty();
        if self >= WireVersion::V3_6 {
            caps |= WireCapabilities::SESSIONS;
            caps |= WireCapabilities::CAUSAL_CONSISTENCY;
        }
        if self >= WireVersion::V4_0 {
            caps |= WireCapabilities::TRANSACTIONS;
        }
        if self >= WireVersion::V3_6 {
            caps |= WireCapabilities::OP_MSG;
        }
        if self >= WireVersion::V4_2 {
            caps |= WireCapabilities::RETRYABLE_WRITES;
        }
        caps
    }

    /// Whether this version meets or exceeds `required`. The common way operations check a
    /// minimum version before sending, per spec §4.3.
    pub fn supports(self, required: WireVersion) -> bool {
        self >= required
    }
}

impl fmt::Display for WireVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WireVersion::V3_0 => "3.0",
            WireVersion::V3_2 => "3.2",
            WireVersion::V3_4 => "3.4",
            WireVersion::V3_6 => "3.6",
            WireVersion::V4_0 => "4.0",
            WireVersion::V4_2 => "4.2",
            WireVersion::V5_0 => "5.0",
            WireVersion::V5_1 => "5.1",
            WireVersion::V6_0 => "6.0",
            WireVersion::V7_0 => "7.0",
            WireVersion::V7_1 => "7.1",
            WireVersion::V7_2 => "7.2",
            WireVersion::V7_3 => "7.3",
            WireVersion::V8_0 => "8.0",
        };
        f.write_str(s)
    }
}

bitflags! {
    /// Capability flags implied by a negotiated wire version, used so command builders can check
    /// `caps.contains(WireCapabilities::TRANSACTIONS)` instead of comparing raw versions.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct WireCapabilities: u8 {
        const SESSIONS            = 0b0000_0001;
        const CAUSAL_CONSISTENCY  = 0b0000_0010;
        const TRANSACTIONS        = 0b0000_0100;
        const RETRYABLE_WRITES    = 0b0000_1000;
        const OP_MSG              = 0b0001_0000;
    }
}
