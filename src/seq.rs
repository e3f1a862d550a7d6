// ==========================================
// 32 位序列号回绕比较 (wraparound-safe ordering)
// ==========================================

const HALF_SPACE: u32 = 0x8000_0000;

/// `a` comes strictly before `b` in sequence space.
///
/// Two values exactly half the space apart are ordered by their raw value so
/// that `before` and `after` stay strict inverses.
#[inline]
pub fn before(a: u32, b: u32) -> bool {
    let diff = b.wrapping_sub(a);
    if diff == HALF_SPACE {
        return a > b;
    }
    (diff as i32) > 0
}

/// `a` comes strictly after `b` in sequence space.
#[inline]
pub fn after(a: u32, b: u32) -> bool {
    before(b, a)
}

#[inline]
pub fn before_eq(a: u32, b: u32) -> bool {
    a == b || before(a, b)
}

#[inline]
pub fn after_eq(a: u32, b: u32) -> bool {
    a == b || after(a, b)
}

/// Forward distance from `from` to `to`, modulo 2^32.
#[inline]
pub fn distance(from: u32, to: u32) -> u32 {
    to.wrapping_sub(from)
}
