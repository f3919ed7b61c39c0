//! Line-oriented request encoding.

/// Which handshake block to frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Handshake {
    /// `BEGIN VERIFICATION REQUEST`: check credentials, then close.
    Verification,
    /// `BEGIN AUTH REQUEST`: open an authorized data connection.
    Auth,
}

impl Handshake {
    fn word(self) -> &'static str {
        match self {
            Self::Verification => "VERIFICATION",
            Self::Auth => "AUTH",
        }
    }
}

/// Encodes a handshake block. `scrambled` must already be scrambled.
pub(crate) fn encode_handshake(
    kind: Handshake,
    root: &str,
    user: &str,
    scrambled: &str,
) -> Vec<u8> {
    let word = kind.word();
    format!("BEGIN {word} REQUEST\n{root}\n{user}\n{scrambled}\nEND {word} REQUEST\n").into_bytes()
}

pub(crate) fn encode_root(root: &str) -> Vec<u8> {
    format!("Root {root}\n").into_bytes()
}

pub(crate) fn encode_directory(dir: &str, root: &str) -> Vec<u8> {
    format!("Directory {dir}\n{root}\n").into_bytes()
}

/// Encodes an argument; embedded newlines continue with `Argumentx` lines.
pub(crate) fn encode_argument(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len() + 16);
    for (idx, line) in value.split('\n').enumerate() {
        let word = if idx == 0 { "Argument" } else { "Argumentx" };
        out.extend_from_slice(format!("{word} {line}\n").as_bytes());
    }
    out
}

pub(crate) fn encode_set(variable: &str, value: &str) -> Vec<u8> {
    format!("Set {variable}={value}\n").into_bytes()
}

/// Encodes a request that takes no argument (`co`, `valid-requests`, ...).
pub(crate) fn encode_bare(name: &str) -> Vec<u8> {
    format!("{name}\n").into_bytes()
}

pub(crate) const VALID_REQUESTS: &str = "valid-requests";
pub(crate) const USE_UNCHANGED: &str = "UseUnchanged";
pub(crate) const EXPAND_MODULES: &str = "expand-modules";
pub(crate) const CHECKOUT: &str = "co";
pub(crate) const EXPORT: &str = "export";

/// Splits a response line into its name and argument.
pub(crate) fn split_response(line: &str) -> (&str, &str) {
    line.split_once(' ').unwrap_or((line, ""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_blocks_match_pserver_framing() {
        assert_eq!(
            encode_handshake(Handshake::Verification, "/cvsroot", "anonymous", "A"),
            b"BEGIN VERIFICATION REQUEST\n/cvsroot\nanonymous\nA\nEND VERIFICATION REQUEST\n"
        );
        assert_eq!(
            encode_handshake(Handshake::Auth, "/cvs", "bob", "Ay"),
            b"BEGIN AUTH REQUEST\n/cvs\nbob\nAy\nEND AUTH REQUEST\n"
        );
    }

    #[test]
    fn command_requests_are_single_lines() {
        assert_eq!(encode_root("/cvsroot/x"), b"Root /cvsroot/x\n");
        assert_eq!(encode_directory(".", "/cvsroot/x"), b"Directory .\n/cvsroot/x\n");
        assert_eq!(encode_set("EDITOR", "vi"), b"Set EDITOR=vi\n");
        assert_eq!(encode_bare(CHECKOUT), b"co\n");
        assert_eq!(encode_bare(USE_UNCHANGED), b"UseUnchanged\n");
    }

    #[test]
    fn multiline_arguments_use_argumentx() {
        assert_eq!(encode_argument("-N"), b"Argument -N\n");
        assert_eq!(
            encode_argument("first\nsecond\nthird"),
            b"Argument first\nArgumentx second\nArgumentx third\n"
        );
    }

    #[test]
    fn split_response_handles_bare_words() {
        assert_eq!(split_response("I LOVE YOU"), ("I", "LOVE YOU"));
        assert_eq!(split_response("Updated a/b/"), ("Updated", "a/b/"));
        assert_eq!(split_response("ok"), ("ok", ""));
    }
}
