/*!
Wire format for the request channel: one line per I/O request, written by the
kernel and read by the interrupt controller.

Format: `"<pid> <type>\n"`, where `<type>` is `0` for READ and `1` for WRITE.
Lines that don't parse are discarded by the reader; this module only exposes
pure encode/decode functions so the grammar is unit-testable without a real
FIFO.
*/

use std::fmt;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum IoType {
    Read,
    Write,
}

impl IoType {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(IoType::Read),
            1 => Some(IoType::Write),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            IoType::Read => 0,
            IoType::Write => 1,
        }
    }
}

impl fmt::Display for IoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IoType::Read => "READ",
            IoType::Write => "WRITE",
        })
    }
}

/// One line of the request channel protocol: a worker pid and the type of
/// I/O it raised.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct IoRequest {
    pub pid: i32,
    pub io_type: IoType,
}

/// Encode a request as the line the kernel writes to the FIFO.
pub fn encode_request(req: IoRequest) -> String {
    format!("{} {}\n", req.pid, req.io_type.code())
}

/// Decode one line of the request channel. Returns `None` for anything that
/// doesn't parse as `"<pid> <type>"` with `<type>` in `{0, 1}` — the reader
/// logs and discards such lines rather than treating them as fatal.
pub fn decode_request(line: &str) -> Option<IoRequest> {
    let line = line.trim();
    let mut parts = line.split_whitespace();
    let pid: i32 = parts.next()?.parse().ok()?;
    let type_code: i32 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    let io_type = IoType::from_code(type_code)?;
    Some(IoRequest { pid, io_type })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let req = IoRequest {
            pid: 4242,
            io_type: IoType::Write,
        };
        let line = encode_request(req);
        assert_eq!(line, "4242 1\n");
        assert_eq!(decode_request(&line), Some(req));
    }

    #[test]
    fn rejects_malformed_lines() {
        assert_eq!(decode_request(""), None);
        assert_eq!(decode_request("not-a-pid 0"), None);
        assert_eq!(decode_request("123"), None);
        assert_eq!(decode_request("123 2"), None);
        assert_eq!(decode_request("123 0 extra"), None);
    }

    #[test]
    fn tolerates_surrounding_whitespace() {
        assert_eq!(
            decode_request("  77 0  \n"),
            Some(IoRequest {
                pid: 77,
                io_type: IoType::Read
            })
        );
    }
}
