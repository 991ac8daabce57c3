//! Dump WAL command implementation.

use super::existing;
use nbredo_core::{WalRecord, WalWriter};
use nbredo_storage::FileBackend;
use serde::Serialize;
use std::path::Path;

/// WAL record representation for output.
#[derive(Debug, Serialize)]
pub struct WalRecordInfo {
    /// Offset in the WAL file.
    pub offset: u64,
    /// LSN the record was stamped with.
    pub lsn: u64,
    /// Record type.
    pub record_type: String,
    /// Index relation.
    pub rel: String,
    /// Human-readable description.
    pub description: String,
    /// Slots carrying a full-page image.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<u8>,
}

impl WalRecordInfo {
    fn new(offset: u64, record: &WalRecord) -> Self {
        Self {
            offset,
            lsn: record.lsn.0,
            record_type: record.kind().name().to_string(),
            rel: record.record.rel().to_string(),
            description: record.record.to_string(),
            images: record.backups.iter().map(|b| b.slot).collect(),
        }
    }
}

/// Runs the dump-wal command.
pub fn run(
    path: &Path,
    limit: Option<usize>,
    start_offset: u64,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let backend = FileBackend::open(existing(path)?)?;
    let wal = WalWriter::new(Box::new(backend), false);
    let records = read_wal_records(&wal, start_offset, limit)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        _ => {
            print_text_output(&records);
        }
    }

    Ok(())
}

fn read_wal_records(
    wal: &WalWriter,
    start_offset: u64,
    limit: Option<usize>,
) -> Result<Vec<WalRecordInfo>, Box<dyn std::error::Error>> {
    let mut records = Vec::new();
    for entry in wal.reader(start_offset)?.take(limit.unwrap_or(usize::MAX)) {
        let (offset, record) = entry?;
        records.push(WalRecordInfo::new(offset, &record));
    }
    Ok(records)
}

fn print_text_output(records: &[WalRecordInfo]) {
    println!("WAL Records ({} total)", records.len());
    println!("================");
    println!();

    for record in records {
        print!("[{:08}] lsn={:<8} {}", record.offset, record.lsn, record.description);
        if !record.images.is_empty() {
            let slots: Vec<String> = record.images.iter().map(u8::to_string).collect();
            print!(" images={}", slots.join(","));
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nbredo_core::wal::{BtreeRecord, NewRootRecord, VacuumRecord};
    use nbredo_core::RelFileId;
    use nbredo_storage::InMemoryBackend;

    const REL: RelFileId = RelFileId::new(1663, 5, 16384);

    fn wal() -> WalWriter {
        let wal = WalWriter::new(Box::new(InMemoryBackend::new()), false);
        wal.log(BtreeRecord::NewRoot(NewRootRecord {
            rel: REL,
            root: 1,
            level: 0,
            items: Vec::new(),
        }))
        .unwrap();
        wal.log(BtreeRecord::Vacuum(VacuumRecord {
            rel: REL,
            block: 1,
            last_block_vacuumed: 0,
            offsets: vec![2, 3],
        }))
        .unwrap();
        wal
    }

    #[test]
    fn limit_and_offset_select_records() {
        let wal = wal();
        let all = read_wal_records(&wal, 0, None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].offset, 0);
        assert_eq!(all[1].offset, all[0].lsn);

        let first = read_wal_records(&wal, 0, Some(1)).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].record_type, all[0].record_type);

        let second = read_wal_records(&wal, all[1].offset, None).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].description, all[1].description);
    }

    #[test]
    fn json_output_names_the_relation() {
        let records = read_wal_records(&wal(), 0, None).unwrap();
        let json = serde_json::to_value(&records).unwrap();
        assert_eq!(json[1]["rel"], REL.to_string());
        assert!(json[1].get("images").is_none());
    }
}
