use embedded_hal_async::i2c::I2c;

use crate::error::i2c_error;
use crate::Error;

/// Longest payload a single register write carries
const MAX_WRITE_LEN: usize = 8;

/// I2C device addressed through 16-bit big-endian register addresses
#[derive(Debug)]
pub(crate) struct RegisterDevice<I2C> {
    i2c: I2C,
    address: u8,
}

impl<I2C> RegisterDevice<I2C>
where
    I2C: I2c,
{
    pub(crate) fn new(i2c: I2C, address: u8) -> Self {
        Self { i2c, address }
    }

    pub(crate) fn release(self) -> I2C {
        self.i2c
    }

    pub(crate) async fn write_register(&mut self, register: u16, data: &[u8]) -> Result<(), Error> {
        if data.len() > MAX_WRITE_LEN {
            return Err(Error::ConfigurationError);
        }
        let mut buffer = [0u8; 2 + MAX_WRITE_LEN];
        buffer[..2].copy_from_slice(&register.to_be_bytes());
        buffer[2..2 + data.len()].copy_from_slice(data);

        self.i2c
            .write(self.address, &buffer[..2 + data.len()])
            .await
            .map_err(i2c_error)
    }

    pub(crate) async fn read_register(&mut self, register: u16) -> Result<u8, Error> {
        let mut buffer = [0u8; 1];
        self.read_register_buffer(register, &mut buffer).await?;
        Ok(buffer[0])
    }

    pub(crate) async fn read_register_buffer(
        &mut self,
        register: u16,
        buffer: &mut [u8],
    ) -> Result<(), Error> {
        self.i2c
            .write_read(self.address, &register.to_be_bytes(), buffer)
            .await
            .map_err(i2c_error)
    }
}
