//! Load address validation.
//!
//! The RetroCPU memory map reserves the first two pages (zero page and
//! stack) and everything from `$8000` upward (BASIC ROM, I/O, monitor ROM).
//! Programs may only be loaded into user RAM in between.

use crate::error::AddressError;

/// Lowest address a program may be loaded at.
pub const USER_RAM_START: u16 = 0x0200;

/// Highest address a program byte may occupy.
pub const USER_RAM_END: u16 = 0x7FFF;

/// Conventional load address used by the monitor's `L` command.
pub const DEFAULT_LOAD_ADDRESS: u16 = 0x0300;

/// Check that `addr` lies in user RAM.
pub fn validate(addr: u16) -> Result<(), AddressError> {
    if addr < USER_RAM_START {
        Err(AddressError::TooLow(addr))
    } else if addr > USER_RAM_END {
        Err(AddressError::InReservedSpace(addr))
    } else {
        Ok(())
    }
}

/// Check that `len` bytes starting at `addr` all lie in user RAM.
///
/// A zero length only validates the start address.
pub fn validate_range(addr: u16, len: usize) -> Result<(), AddressError> {
    validate(addr)?;

    let Some(last_offset) = len.checked_sub(1) else {
        return Ok(());
    };
    let last = usize::from(addr).saturating_add(last_offset);
    if last > usize::from(USER_RAM_END) {
        // Report the first byte that spills over.
        return Err(AddressError::InReservedSpace(USER_RAM_END.wrapping_add(1)));
    }
    Ok(())
}

/// Parse a load address given as hex, with optional `0x` or `$` prefix.
pub fn parse_address(s: &str) -> Result<u16, String> {
    let s = s.trim();
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .or_else(|| s.strip_prefix('$'))
        .unwrap_or(s);
    if digits.is_empty() {
        return Err(format!("Invalid address: '{s}'"));
    }
    u16::from_str_radix(digits, 16).map_err(|e| format!("Invalid hex address '{s}': {e}"))
}
