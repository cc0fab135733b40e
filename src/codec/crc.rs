//! # CRC-16 Implementation
//!
//! Table-driven CRC-16 with configurable polynomial, initial value, output
//! XOR and reflection flags. The length+CRC codec uses
//! [`CRC16_CCITT_FALSE`]:
//!
//! **Polynomial**: 0x1021 (x^16 + x^12 + x^5 + 1)
//! **Initial Value**: 0xFFFF
//! **Reflected**: no

/// Parameters of one CRC-16 variant (Rocksoft model)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crc16Params {
    pub poly: u16,
    pub init: u16,
    pub xorout: u16,
    pub refin: bool,
    pub refout: bool,
}

/// CRC-16/CCITT-FALSE, check value 0x29B1
pub const CRC16_CCITT_FALSE: Crc16Params = Crc16Params {
    poly: 0x1021,
    init: 0xFFFF,
    xorout: 0x0000,
    refin: false,
    refout: false,
};

/// CRC-16/XMODEM, check value 0x31C3
pub const CRC16_XMODEM: Crc16Params = Crc16Params {
    poly: 0x1021,
    init: 0x0000,
    xorout: 0x0000,
    refin: false,
    refout: false,
};

/// CRC-16/KERMIT, check value 0x2189
pub const CRC16_KERMIT: Crc16Params = Crc16Params {
    poly: 0x1021,
    init: 0x0000,
    xorout: 0x0000,
    refin: true,
    refout: true,
};

/// CRC-16/ARC, check value 0xBB3D
pub const CRC16_ARC: Crc16Params = Crc16Params {
    poly: 0x8005,
    init: 0x0000,
    xorout: 0x0000,
    refin: true,
    refout: true,
};

/// Precomputed engine for the length+CRC codec
pub static CCITT_FALSE: Crc16 = Crc16::new(CRC16_CCITT_FALSE);

/// CRC-16 engine with its lookup table
#[derive(Clone)]
pub struct Crc16 {
    params: Crc16Params,
    table: [u16; 256],
}

impl std::fmt::Debug for Crc16 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crc16")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl Crc16 {
    /// Build the lookup table at compile time (or once at startup)
    pub const fn new(params: Crc16Params) -> Self {
        Self {
            params,
            table: generate_crc16_table(params.poly, params.refin),
        }
    }

    pub fn params(&self) -> Crc16Params {
        self.params
    }

    /// Calculate the checksum of `data` using the lookup table
    ///
    /// # Examples
    ///
    /// ```
    /// use rc_link::codec::crc::CCITT_FALSE;
    ///
    /// assert_eq!(CCITT_FALSE.checksum(b"123456789"), 0x29B1);
    /// ```
    pub fn checksum(&self, data: &[u8]) -> u16 {
        let mut crc = if self.params.refin {
            self.params.init.reverse_bits()
        } else {
            self.params.init
        };

        if self.params.refin {
            for &byte in data {
                crc = (crc >> 8) ^ self.table[((crc ^ byte as u16) & 0xFF) as usize];
            }
        } else {
            for &byte in data {
                crc = (crc << 8) ^ self.table[(((crc >> 8) ^ byte as u16) & 0xFF) as usize];
            }
        }

        // Register is reflected iff refin; flip when the output wants the other order
        if self.params.refin != self.params.refout {
            crc = crc.reverse_bits();
        }

        crc ^ self.params.xorout
    }
}

/// Generate a CRC-16 lookup table
///
/// Reflected tables are built from the bit-reversed polynomial and are
/// indexed by the low byte of the register.
const fn generate_crc16_table(poly: u16, reflected: bool) -> [u16; 256] {
    let mut table = [0u16; 256];
    let rpoly = poly.reverse_bits();
    let mut i = 0;

    while i < 256 {
        let mut crc: u16 = if reflected { i as u16 } else { (i as u16) << 8 };
        let mut j = 0;

        while j < 8 {
            if reflected {
                if (crc & 0x0001) != 0 {
                    crc = (crc >> 1) ^ rpoly;
                } else {
                    crc >>= 1;
                }
            } else if (crc & 0x8000) != 0 {
                crc = (crc << 1) ^ poly;
            } else {
                crc <<= 1;
            }
            j += 1;
        }

        table[i] = crc;
        i += 1;
    }

    table
}

/// Calculate CRC-16 bit by bit (slow, for verification)
///
/// Processes every input byte MSB-first against the plain polynomial,
/// reflecting input bytes and the output as the parameters demand.
#[allow(dead_code)]
fn crc16_slow(params: Crc16Params, data: &[u8]) -> u16 {
    let mut crc = params.init;

    for &byte in data {
        let byte = if params.refin { byte.reverse_bits() } else { byte };
        crc ^= (byte as u16) << 8;

        for _ in 0..8 {
            if (crc & 0x8000) != 0 {
                crc = (crc << 1) ^ params.poly;
            } else {
                crc <<= 1;
            }
        }
    }

    if params.refout {
        crc = crc.reverse_bits();
    }

    crc ^ params.xorout
}
