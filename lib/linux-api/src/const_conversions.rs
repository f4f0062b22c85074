//! Small `const fn` numeric conversions for use inside `const` contexts
//! (bitflags definitions, associated consts, etc.) where the `?`-operator
//! and panicking `From`/`TryFrom` impls aren't available.

/// Reinterprets the bits of `x` as `i32`, panicking if `x` doesn't fit.
///
/// Use this for flag/constant values that are conceptually unsigned but are
/// represented using a signed integer type in our API (because that's what
/// the underlying syscall or libc function expects).
pub const fn i32_from_u32(x: u32) -> i32 {
    if x > i32::MAX as u32 {
        panic!("Value out of range for i32");
    }
    x as i32
}

/// Reinterprets the bits of `x` as `i32`, allowing silent wraparound.
///
/// Some kernel flag constants (e.g. `__WCLONE`) are defined with their high
/// bit set, which is perfectly valid as a bit pattern but doesn't fit in the
/// positive range of an `i32`. This function makes the (deliberate)
/// wraparound explicit at the call site instead of relying on an `as` cast
/// buried in a macro invocation.
pub const fn i32_from_u32_allowing_wraparound(x: u32) -> i32 {
    x as i32
}

/// Widens `x` to `u64`.
pub const fn u64_from_u32(x: u32) -> u64 {
    x as u64
}

/// Narrows `x` to `u16`, panicking if `x` doesn't fit.
pub const fn u16_from_u32(x: u32) -> u16 {
    if x > u16::MAX as u32 {
        panic!("Value out of range for u16");
    }
    x as u16
}

/// Widens `x` to `usize`.
pub const fn usize_from_u32(x: u32) -> usize {
    x as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_i32_from_u32() {
        assert_eq!(i32_from_u32(0), 0);
        assert_eq!(i32_from_u32(i32::MAX as u32), i32::MAX);
    }

    #[test]
    #[should_panic]
    fn test_i32_from_u32_overflow() {
        i32_from_u32(u32::MAX);
    }

    #[test]
    fn test_i32_from_u32_allowing_wraparound() {
        assert_eq!(i32_from_u32_allowing_wraparound(0x8000_0000), i32::MIN);
    }

    #[test]
    fn test_u64_from_u32() {
        assert_eq!(u64_from_u32(u32::MAX), u32::MAX as u64);
    }

    #[test]
    fn test_u16_from_u32() {
        assert_eq!(u16_from_u32(0xffff), 0xffffu16);
    }

    #[test]
    #[should_panic]
    fn test_u16_from_u32_overflow() {
        u16_from_u32(0x1_0000);
    }

    #[test]
    fn test_usize_from_u32() {
        assert_eq!(usize_from_u32(42), 42usize);
    }
}
