//! Transaction sources and itemset sinks.
//!
//! A source is a restartable row producer that knows its row count and its
//! largest item id before mining starts. A sink receives mined itemsets in
//! discovery order.

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{MiningError, Result};
use crate::itemset::{Item, Itemset};

pub trait TransactionSource {
    fn num_rows(&self) -> u64;

    /// Largest item id present, 0 for a source without items.
    fn num_items(&self) -> u32;

    /// Restart from the first row.
    fn rewind(&mut self) -> Result<()>;

    /// Next row as a strictly increasing slice of item ids.
    fn next_row(&mut self) -> Result<Option<&[Item]>>;
}

/// Rewind `source` and feed every row to `f`.
pub fn scan<S, F>(source: &mut S, mut f: F) -> Result<()>
where
    S: TransactionSource + ?Sized,
    F: FnMut(&[Item]) -> Result<()>,
{
    source.rewind()?;
    while let Some(row) = source.next_row()? {
        f(row)?;
    }
    Ok(())
}

fn normalize_row(row: &mut Vec<Item>) -> Result<()> {
    if row.iter().any(|&i| i == 0) {
        return Err(MiningError::invalid("item ids must be positive"));
    }
    row.sort_unstable();
    row.dedup();
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    rows: Vec<Vec<Item>>,
    num_items: u32,
    pos: usize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows are sorted and deduplicated; a zero id is rejected.
    pub fn from_rows(rows: Vec<Vec<Item>>) -> Result<Self> {
        let mut source = MemorySource { rows: Vec::with_capacity(rows.len()), ..Self::default() };
        for row in rows {
            source.push_row(row)?;
        }
        Ok(source)
    }

    pub fn push_row(&mut self, mut row: Vec<Item>) -> Result<()> {
        normalize_row(&mut row)?;
        if let Some(&last) = row.last() {
            self.num_items = self.num_items.max(last);
        }
        self.rows.push(row);
        Ok(())
    }

    /// Caller guarantees the row is already normalized.
    pub(crate) fn push_sorted_row(&mut self, row: Vec<Item>) {
        if let Some(&last) = row.last() {
            self.num_items = self.num_items.max(last);
        }
        self.rows.push(row);
    }

    pub fn rows(&self) -> &[Vec<Item>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<Item>> {
        self.rows
    }
}

impl TransactionSource for MemorySource {
    fn num_rows(&self) -> u64 {
        self.rows.len() as u64
    }

    fn num_items(&self) -> u32 {
        self.num_items
    }

    fn rewind(&mut self) -> Result<()> {
        self.pos = 0;
        Ok(())
    }

    fn next_row(&mut self) -> Result<Option<&[Item]>> {
        let row = self.rows.get(self.pos).map(Vec::as_slice);
        if row.is_some() {
            self.pos += 1;
        }
        Ok(row)
    }
}

/// One transaction per line, item ids separated by whitespace.
/// A blank line is an empty transaction.
pub struct TextSource<R> {
    reader: R,
    line: String,
    row: Vec<Item>,
    line_no: usize,
    num_rows: u64,
    num_items: u32,
}

impl TextSource<BufReader<File>> {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(BufReader::new(File::open(path)?))
    }
}

impl<R: BufRead + Seek> TextSource<R> {
    /// Validates the whole input once to learn its dimensions.
    pub fn open(reader: R) -> Result<Self> {
        let mut source = TextSource {
            reader,
            line: String::new(),
            row: Vec::new(),
            line_no: 0,
            num_rows: 0,
            num_items: 0,
        };
        source.rewind()?;
        let (mut rows, mut max) = (0u64, 0u32);
        while let Some(row) = source.next_row()? {
            rows += 1;
            if let Some(&last) = row.last() {
                max = max.max(last);
            }
        }
        source.num_rows = rows;
        source.num_items = max;
        source.rewind()?;
        Ok(source)
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

fn parse_row(line: &str, line_no: usize, row: &mut Vec<Item>) -> Result<()> {
    row.clear();
    for tok in line.split_whitespace() {
        let item: Item = tok.parse().map_err(|_| MiningError::Parse {
            line: line_no,
            message: format!("'{}' is not an item id", tok),
        })?;
        if item == 0 {
            return Err(MiningError::Parse { line: line_no, message: "item ids must be positive".into() });
        }
        row.push(item);
    }
    row.sort_unstable();
    row.dedup();
    Ok(())
}

impl<R: BufRead + Seek> TransactionSource for TextSource<R> {
    fn num_rows(&self) -> u64 {
        self.num_rows
    }

    fn num_items(&self) -> u32 {
        self.num_items
    }

    fn rewind(&mut self) -> Result<()> {
        self.reader.seek(SeekFrom::Start(0))?;
        self.line_no = 0;
        Ok(())
    }

    fn next_row(&mut self) -> Result<Option<&[Item]>> {
        self.line.clear();
        if self.reader.read_line(&mut self.line)? == 0 {
            return Ok(None);
        }
        self.line_no += 1;
        parse_row(&self.line, self.line_no, &mut self.row)?;
        Ok(Some(&self.row))
    }
}

pub trait ItemsetSink {
    fn write_itemset(&mut self, itemset: &Itemset) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<S: ItemsetSink + ?Sized> ItemsetSink for &mut S {
    fn write_itemset(&mut self, itemset: &Itemset) -> Result<()> {
        (**self).write_itemset(itemset)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

impl ItemsetSink for Vec<Itemset> {
    fn write_itemset(&mut self, itemset: &Itemset) -> Result<()> {
        self.push(itemset.clone());
        Ok(())
    }
}

/// Counts what it is given and drops it.
#[derive(Debug, Default)]
pub struct NullSink {
    pub count: u64,
}

impl ItemsetSink for NullSink {
    fn write_itemset(&mut self, _itemset: &Itemset) -> Result<()> {
        self.count += 1;
        Ok(())
    }
}

/// Writes `items<TAB>weight<TAB>support` lines.
pub struct TextSink<W: Write> {
    writer: W,
    written: u64,
}

impl<W: Write> TextSink<W> {
    pub fn new(writer: W) -> Self {
        TextSink { writer, written: 0 }
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(mut self) -> Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

impl<W: Write> ItemsetSink for TextSink<W> {
    fn write_itemset(&mut self, itemset: &Itemset) -> Result<()> {
        writeln!(self.writer, "{}\t{}\t{}", itemset, itemset.weight(), itemset.support())?;
        self.written += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Read back the lines written by a [`TextSink`].
pub fn read_itemsets<R: BufRead>(reader: R) -> Result<Vec<Itemset>> {
    let mut out = Vec::new();
    let mut items = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = i + 1;
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split('\t');
        let bad = |what: &str| MiningError::Parse { line: line_no, message: format!("missing or invalid {}", what) };
        parse_row(fields.next().unwrap_or(""), line_no, &mut items)?;
        if items.is_empty() {
            return Err(bad("items"));
        }
        let weight: u64 = fields.next().and_then(|f| f.trim().parse().ok()).ok_or_else(|| bad("weight"))?;
        let support: f64 = fields.next().and_then(|f| f.trim().parse().ok()).ok_or_else(|| bad("support"))?;
        let mut is = Itemset::from_sorted(items.clone());
        is.set_weight(weight);
        is.set_support(support).map_err(|e| MiningError::Parse { line: line_no, message: e.to_string() })?;
        out.push(is);
    }
    Ok(out)
}
