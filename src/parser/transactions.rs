// Chunked reader for the price-paid CSV
use crate::model::{LoadError, Transaction};
use crate::utils::{clean_field, parse_price, parse_sale_date};
use csv::{ByteRecord, Reader, ReaderBuilder};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

const ID: usize = 0;
const PRICE: usize = 1;
const SALE_DATE: usize = 2;
const POSTAL_CODE: usize = 3;
const HOUSE: usize = 7;
const SUB: usize = 8;
const STREET: usize = 9;
const LOCALITY: usize = 10;
const TOWN: usize = 11;
const DISTRICT: usize = 12;
const COUNTY: usize = 13;

/// Yields the price-paid table in fixed-size chunks to bound peak memory.
/// Rows without a usable price, sale date or postal code, or holding bytes that
/// are not UTF-8, are dropped and counted.
pub struct TransactionReader<R: Read> {
    reader: Reader<R>,
    chunk_size: usize,
    next_row: u64,
    dropped: u64,
    record: ByteRecord,
    finished: bool,
}

impl TransactionReader<File> {
    pub fn open(path: impl AsRef<Path>, chunk_size: usize) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| LoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::from_reader(file, chunk_size))
    }
}

impl<R: Read> TransactionReader<R> {
    pub fn from_reader(input: R, chunk_size: usize) -> Self {
        let reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(input);
        Self {
            reader,
            chunk_size: chunk_size.max(1),
            next_row: 0,
            dropped: 0,
            record: ByteRecord::new(),
            finished: false,
        }
    }

    /// Rows dropped so far because of missing or malformed fields.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Rows read so far, kept or dropped.
    pub fn rows_read(&self) -> u64 {
        self.next_row
    }

    pub fn next_chunk(&mut self) -> Result<Option<Vec<Transaction>>, LoadError> {
        if self.finished {
            return Ok(None);
        }

        let mut chunk = Vec::with_capacity(self.chunk_size.min(65_536));
        while chunk.len() < self.chunk_size {
            if !self.reader.read_byte_record(&mut self.record)? {
                self.finished = true;
                break;
            }
            let row = self.next_row;
            self.next_row += 1;
            match parse_transaction(&self.record, row) {
                Some(tx) => chunk.push(tx),
                None => self.dropped += 1,
            }
        }

        if chunk.is_empty() && self.finished {
            return Ok(None);
        }
        debug!("Read chunk of {} transactions (dropped so far: {})", chunk.len(), self.dropped);
        Ok(Some(chunk))
    }
}

impl<R: Read> Iterator for TransactionReader<R> {
    type Item = Result<Vec<Transaction>, LoadError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().transpose()
    }
}

fn parse_transaction(record: &ByteRecord, row: u64) -> Option<Transaction> {
    let fields = record
        .iter()
        .map(|bytes| std::str::from_utf8(bytes).ok())
        .collect::<Option<Vec<&str>>>()?;
    let field = |index: usize| fields.get(index).copied().and_then(clean_field);

    let id = field(ID)?;
    let price = parse_price(fields.get(PRICE)?)?;
    let sale_date = parse_sale_date(fields.get(SALE_DATE)?)?;
    let postal_code = field(POSTAL_CODE)?.to_uppercase();

    Some(Transaction {
        id,
        row,
        price,
        sale_date,
        postal_code,
        house_identifier: field(HOUSE).unwrap_or_default(),
        sub_identifier: field(SUB),
        street: field(STREET),
        locality: field(LOCALITY),
        town: field(TOWN),
        district: field(DISTRICT),
        county: field(COUNTY),
    })
}
