use super::DecodeError;

/// Sequential big-endian cursor over a borrowed buffer
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn take(&mut self, field: &'static str, n: usize) -> Result<&'a [u8], DecodeError> {
        let remaining = self.remaining();
        if remaining < n {
            return Err(DecodeError::TruncatedMessage {
                field,
                needed: n,
                remaining,
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub(crate) fn array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(field, N)?);
        Ok(out)
    }

    pub(crate) fn u8(&mut self, field: &'static str) -> Result<u8, DecodeError> {
        Ok(self.array::<1>(field)?[0])
    }

    pub(crate) fn u16(&mut self, field: &'static str) -> Result<u16, DecodeError> {
        Ok(u16::from_be_bytes(self.array(field)?))
    }

    pub(crate) fn u32(&mut self, field: &'static str) -> Result<u32, DecodeError> {
        Ok(u32::from_be_bytes(self.array(field)?))
    }

    pub(crate) fn u64(&mut self, field: &'static str) -> Result<u64, DecodeError> {
        Ok(u64::from_be_bytes(self.array(field)?))
    }

    /// Consume everything left
    pub(crate) fn rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_big_endian_reads() {
        let buf = [0x01, 0x02, 0x00, 0x00, 0x00, 0x03, 0xff];
        let mut reader = Reader::new(&buf);
        assert_eq!(reader.u16("a").unwrap(), 0x0102);
        assert_eq!(reader.u32("b").unwrap(), 3);
        assert_eq!(reader.remaining(), 1);
        assert_eq!(reader.rest(), &[0xff]);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_short_read_reports_field() {
        let mut reader = Reader::new(&[0u8; 3]);
        let err = reader.u64("sequence").unwrap_err();
        assert_eq!(
            err,
            DecodeError::TruncatedMessage {
                field: "sequence",
                needed: 8,
                remaining: 3
            }
        );
    }
}
