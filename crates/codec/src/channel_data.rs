use bytes::{BufMut, BytesMut};

use crate::Error;

/// A ChannelData message (RFC 8656 §12): a 4-byte header (channel number,
/// length) followed by the application payload. Replaces the heavier
/// Send/Data indications once a channel binding is installed.
pub struct ChannelData<'a> {
    pub number: u16,
    pub bytes: &'a [u8],
}

impl<'a> ChannelData<'a> {
    pub fn number(&self) -> u16 {
        self.number
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.bytes
    }

    /// Returns the full on-wire size of the ChannelData message starting at
    /// `bytes`, including the 4-byte header. `is_tcp` pads the result up to
    /// the next 4-byte boundary, as required on connection-oriented
    /// transports.
    ///
    /// # Test
    ///
    /// ```
    /// use bytes::BytesMut;
    /// use turnperf_codec::channel_data::ChannelData;
    ///
    /// let data: [u8; 4] = [0x40, 0x00, 0x00, 0x40];
    /// let mut bytes = BytesMut::with_capacity(1500);
    ///
    /// ChannelData {
    ///     number: 16384,
    ///     bytes: &data[..],
    /// }
    /// .encode(&mut bytes);
    ///
    /// assert_eq!(ChannelData::message_size(&bytes[..], false).unwrap(), 8);
    /// ```
    pub fn message_size(bytes: &[u8], is_tcp: bool) -> Result<usize, Error> {
        if bytes.len() < 4 {
            return Err(Error::Incomplete);
        }

        if !(0x4000..0x8000).contains(&u16::from_be_bytes(bytes[0..2].try_into()?)) {
            return Err(Error::InvalidInput);
        }

        let mut size = (u16::from_be_bytes(bytes[2..4].try_into()?) as usize) + 4;
        if is_tcp && size % 4 != 0 {
            size += 4 - (size % 4);
        }

        Ok(size)
    }

    /// # Test
    ///
    /// ```
    /// use bytes::BytesMut;
    /// use turnperf_codec::channel_data::ChannelData;
    ///
    /// let data: [u8; 4] = [0x40, 0x00, 0x00, 0x40];
    /// let mut bytes = BytesMut::with_capacity(1500);
    ///
    /// ChannelData {
    ///     number: 16384,
    ///     bytes: &data[..],
    /// }
    /// .encode(&mut bytes);
    ///
    /// let ret = ChannelData::decode(&bytes[..]).unwrap();
    /// assert_eq!(ret.number, 16384);
    /// assert_eq!(ret.bytes, &data[..]);
    /// ```
    pub fn encode(self, bytes: &mut BytesMut) {
        bytes.clear();
        bytes.put_u16(self.number);
        bytes.put_u16(self.bytes.len() as u16);
        bytes.put(self.bytes);
    }

    pub fn decode(bytes: &'a [u8]) -> Result<Self, Error> {
        if bytes.len() < 4 {
            return Err(Error::Incomplete);
        }

        let number = u16::from_be_bytes(bytes[0..2].try_into()?);
        if !(0x4000..0x8000).contains(&number) {
            return Err(Error::InvalidInput);
        }

        let size = u16::from_be_bytes(bytes[2..4].try_into()?) as usize;
        if size > bytes.len() - 4 {
            return Err(Error::Incomplete);
        }

        Ok(Self {
            number,
            bytes: &bytes[4..4 + size],
        })
    }
}
