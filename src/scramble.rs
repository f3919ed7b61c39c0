//! The pserver password "scramble".
//!
//! This is the fixed substitution table every CVS pserver uses to keep
//! passwords from being readable at a glance on the wire and in `.cvspass`.
//! It is not encryption. The table must stay byte-for-byte identical to the
//! reference implementation for servers to accept the password.

/// `(plain, scrambled)` pairs for the invariant ISO 646 characters.
const SHIFTS: &[(u8, u8)] = &[
    (b'!', 120),
    (b'"', 53),
    (b'%', 109),
    (b'&', 72),
    (b'\'', 108),
    (b'(', 70),
    (b')', 64),
    (b'*', 76),
    (b'+', 67),
    (b',', 116),
    (b'-', 74),
    (b'.', 68),
    (b'/', 87),
    (b':', 112),
    (b';', 86),
    (b'<', 118),
    (b'=', 110),
    (b'>', 122),
    (b'?', 105),
    (b'_', 56),
    (b'0', 111),
    (b'1', 52),
    (b'2', 75),
    (b'3', 119),
    (b'4', 49),
    (b'5', 34),
    (b'6', 82),
    (b'7', 81),
    (b'8', 95),
    (b'9', 65),
    (b'A', 57),
    (b'B', 83),
    (b'C', 43),
    (b'D', 46),
    (b'E', 102),
    (b'F', 40),
    (b'G', 89),
    (b'H', 38),
    (b'I', 103),
    (b'J', 45),
    (b'K', 50),
    (b'L', 42),
    (b'M', 123),
    (b'N', 91),
    (b'O', 35),
    (b'P', 125),
    (b'Q', 55),
    (b'R', 54),
    (b'S', 66),
    (b'T', 124),
    (b'U', 126),
    (b'V', 59),
    (b'W', 47),
    (b'X', 92),
    (b'Y', 71),
    (b'Z', 115),
    (b'a', 121),
    (b'b', 117),
    (b'c', 104),
    (b'd', 101),
    (b'e', 100),
    (b'f', 69),
    (b'g', 73),
    (b'h', 99),
    (b'i', 63),
    (b'j', 94),
    (b'k', 93),
    (b'l', 39),
    (b'm', 37),
    (b'n', 61),
    (b'o', 48),
    (b'p', 58),
    (b'q', 113),
    (b'r', 32),
    (b's', 90),
    (b't', 44),
    (b'u', 98),
    (b'v', 60),
    (b'w', 51),
    (b'x', 33),
    (b'y', 97),
    (b'z', 62),
];

/// Marker byte prefixed to every scrambled password (scramble method "A").
const METHOD_A: char = 'A';

const fn build(inverse: bool) -> [u8; 128] {
    let mut table = [0u8; 128];
    let mut i = 0;
    while i < SHIFTS.len() {
        let (plain, scrambled) = SHIFTS[i];
        if inverse {
            table[scrambled as usize] = plain;
        } else {
            table[plain as usize] = scrambled;
        }
        i += 1;
    }
    table
}

static FORWARD: [u8; 128] = build(false);
static INVERSE: [u8; 128] = build(true);

fn lookup(table: &[u8; 128], ch: char) -> Option<char> {
    let idx = usize::try_from(u32::from(ch)).ok()?;
    match table.get(idx) {
        Some(0) | None => None,
        Some(&mapped) => Some(char::from(mapped)),
    }
}

/// Scrambles a plaintext password for the wire.
///
/// The result always starts with `A`. Characters outside the table (control
/// characters, space, non-ASCII and the variant ISO 646 characters such as
/// `#`, `@` or `{`) are dropped.
///
/// ```
/// assert_eq!(cvs::scramble_password("anonymous"), "Ay=0=a%0bZ");
/// ```
pub fn scramble_password(plaintext: &str) -> String {
    let mut out = String::with_capacity(plaintext.len() + 1);
    out.push(METHOD_A);
    out.extend(plaintext.chars().filter_map(|ch| lookup(&FORWARD, ch)));
    out
}

/// Reverses [`scramble_password`].
///
/// Returns `None` if `scrambled` does not use scramble method `A`. Characters
/// that no plaintext character maps to are dropped.
pub fn descramble_password(scrambled: &str) -> Option<String> {
    let body = scrambled.strip_prefix(METHOD_A)?;
    Some(body.chars().filter_map(|ch| lookup(&INVERSE, ch)).collect())
}
