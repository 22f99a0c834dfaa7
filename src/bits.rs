//! Bit-field arithmetic over a single register byte.

/// Describes a bit field inside a register: LSB index and width
#[derive(Debug, Clone, Copy)]
pub struct BitBlock {
    pub bit: u8,
    pub length: u8,
}

fn mask(length: u8) -> u8 {
    ((1u16 << length) - 1) as u8
}

/// Bit n of byte, as 0 or 1
pub fn get_bit(byte: u8, n: u8) -> u8 {
    (byte >> n) & 1
}

/// Sets or clears bit n of byte
pub fn set_bit(byte: &mut u8, n: u8, enable: bool) {
    if enable {
        *byte |= 1 << n;
    } else {
        *byte &= !(1 << n);
    }
}

/// Extracts `length` bits of byte starting at `start_bit`
pub fn get_bits(byte: u8, start_bit: u8, length: u8) -> u8 {
    (byte >> start_bit) & mask(length)
}

/// Replaces `length` bits of byte starting at `start_bit` with data, leaving
/// the rest of the byte untouched
pub fn set_bits(byte: &mut u8, start_bit: u8, length: u8, data: u8) {
    let field = mask(length) << start_bit;
    *byte = (*byte & !field) | ((data << start_bit) & field);
}
