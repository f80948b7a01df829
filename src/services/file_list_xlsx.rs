//! Excel (`.xlsx`) digital file lists.
//!
//! The workbook carries the same fields as the JSON form, one sheet each:
//!
//! - `Admin`: two columns, label and value (`Accession`, `Application`). Optional.
//! - `Folders`: header row, then one row per folder keyed by a `folder` column.
//! - `Files`: header row, then one row per file. The folder a file belongs to
//!   is its `filepath` parent.
//!
//! Sheet names and headers match case-insensitively, ignoring spaces and
//! underscores, so `Last Modified` and `lastModified` are the same column.

use crate::models::filelist::{AdminMeta, FileListMetadata, FileMeta, FolderMeta};
use calamine::{Data, Range, Reader, Xlsx};
use std::{collections::HashMap, io::Cursor};

pub const OUTPUT_FILE_TYPE: &str = "excel";

const ADMIN_SHEET: &str = "admin";
const FOLDERS_SHEET: &str = "folders";
const FILES_SHEET: &str = "files";

/// Parse an xlsx file list. Every structural problem is returned at once.
pub fn parse(bytes: &[u8]) -> Result<FileListMetadata, Vec<String>> {
    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes))
        .map_err(|err| vec![format!("workbook could not be opened: {err}")])?;

    let sheets: HashMap<String, String> = workbook
        .sheet_names()
        .into_iter()
        .map(|name| (normalize(&name), name))
        .collect();
    let mut range = |key: &str| -> Result<Option<Range<Data>>, Vec<String>> {
        let Some(name) = sheets.get(key) else {
            return Ok(None);
        };
        workbook
            .worksheet_range(name)
            .map(Some)
            .map_err(|err| vec![format!("sheet `{name}` could not be read: {err}")])
    };

    let admin = range(ADMIN_SHEET)?.map(|sheet| admin_meta(&sheet));
    let folders_sheet = range(FOLDERS_SHEET)?;
    let Some(files_sheet) = range(FILES_SHEET)? else {
        return Err(vec!["workbook has no `Files` sheet".to_string()]);
    };

    let mut problems = Vec::new();
    let mut metadata = FileListMetadata {
        admin,
        ..FileListMetadata::default()
    };

    if let Some(sheet) = folders_sheet {
        match Table::new(&sheet, "Folders", &["folder"]) {
            Ok(table) => {
                for row in table.rows() {
                    let folder = row.text("folder");
                    if folder.is_empty() {
                        continue;
                    }
                    metadata.folders.insert(
                        folder,
                        FolderMeta {
                            schedule: row.optional("schedule"),
                            classification: row.optional("classification"),
                            file: row.optional("file"),
                            opr: row.flag("opr"),
                            start_date: row.optional("startdate"),
                            end_date: row.optional("enddate"),
                            so_date: row.optional("sodate"),
                            fd_date: row.optional("fddate"),
                        },
                    );
                }
            }
            Err(err) => problems.push(err),
        }
    }

    match Table::new(&files_sheet, "Files", &["filepath", "checksum"]) {
        Ok(table) => {
            for row in table.rows() {
                let filepath = row.text("filepath");
                if filepath.is_empty() {
                    continue;
                }
                let (folder, name) = filepath.rsplit_once('/').unwrap_or(("", filepath.as_str()));
                let filename = row.optional("filename").unwrap_or_else(|| name.to_string());
                let folder = folder.to_string();
                metadata.files.entry(folder).or_default().push(FileMeta {
                    filename,
                    size: row.text("size"),
                    checksum: row.text("checksum"),
                    birthtime: row.text("birthtime"),
                    last_modified: row.text("lastmodified"),
                    last_accessed: row.text("lastaccessed"),
                    last_saved: row.optional("lastsaved"),
                    authors: row.optional("authors"),
                    owner: row.optional("owner"),
                    company: row.optional("company"),
                    computer: row.optional("computer"),
                    content_type: row.optional("contenttype"),
                    program_name: row.optional("programname"),
                    filepath,
                });
            }
        }
        Err(err) => problems.push(err),
    }

    if problems.is_empty() {
        Ok(metadata)
    } else {
        Err(problems)
    }
}

fn normalize(label: &str) -> String {
    label
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Cell contents as the JSON form would carry them. Whole numbers lose their
/// trailing `.0`.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(text) => text.trim().to_string(),
        Data::Int(value) => value.to_string(),
        Data::Float(value) if value.fract() == 0.0 && value.abs() < 1e15 => {
            format!("{}", *value as i64)
        }
        other => other.to_string().trim().to_string(),
    }
}

fn admin_meta(sheet: &Range<Data>) -> AdminMeta {
    let mut admin = AdminMeta::default();
    for row in sheet.rows() {
        let (Some(label), Some(value)) = (row.first(), row.get(1)) else {
            continue;
        };
        let value = cell_text(value);
        if value.is_empty() {
            continue;
        }
        match normalize(&cell_text(label)).as_str() {
            "accession" | "accessionnumber" => admin.accession = Some(value),
            "application" | "applicationnumber" => admin.application = Some(value),
            _ => {}
        }
    }
    admin
}

/// A sheet whose first row names its columns.
struct Table<'a> {
    columns: HashMap<String, usize>,
    body: Vec<&'a [Data]>,
}

impl<'a> Table<'a> {
    fn new(sheet: &'a Range<Data>, name: &str, required: &[&str]) -> Result<Self, String> {
        let mut rows = sheet.rows();
        let header = rows.next().unwrap_or_default();
        let columns: HashMap<String, usize> = header
            .iter()
            .enumerate()
            .map(|(idx, cell)| (normalize(&cell_text(cell)), idx))
            .filter(|(label, _)| !label.is_empty())
            .collect();

        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|column| !columns.contains_key(*column))
            .collect();
        if !missing.is_empty() {
            return Err(format!(
                "sheet `{name}` is missing column(s): {}",
                missing.join(", ")
            ));
        }

        Ok(Self {
            columns,
            body: rows.collect(),
        })
    }

    fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.body.iter().map(|cells| Row {
            columns: &self.columns,
            cells,
        })
    }
}

struct Row<'a> {
    columns: &'a HashMap<String, usize>,
    cells: &'a [Data],
}

impl Row<'_> {
    fn text(&self, column: &str) -> String {
        self.columns
            .get(column)
            .and_then(|idx| self.cells.get(*idx))
            .map(cell_text)
            .unwrap_or_default()
    }

    fn optional(&self, column: &str) -> Option<String> {
        Some(self.text(column)).filter(|value| !value.is_empty())
    }

    fn flag(&self, column: &str) -> Option<bool> {
        let cell = self.columns.get(column).and_then(|idx| self.cells.get(*idx))?;
        if let Data::Bool(value) = cell {
            return Some(*value);
        }
        match cell_text(cell).to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" | "1" => Some(true),
            "false" | "no" | "n" | "0" => Some(false),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::file_list_xlsx;
    use rust_xlsxwriter::Workbook;

    #[test]
    fn reads_admin_folders_and_files() {
        let bytes = file_list_xlsx(
            "123",
            "456",
            &[("content/file1.txt", b"hello"), ("content/reports/q1.csv", b"1,10")],
        );

        let metadata = parse(&bytes).unwrap();

        let admin = metadata.admin.unwrap();
        assert_eq!(admin.accession.as_deref(), Some("123"));
        assert_eq!(admin.application.as_deref(), Some("456"));
        assert_eq!(metadata.folders["content"].schedule.as_deref(), Some("100001"));
        assert_eq!(metadata.folders["content"].opr, Some(true));
        let files = &metadata.files["content/reports"];
        assert_eq!(files[0].filepath, "content/reports/q1.csv");
        assert_eq!(files[0].filename, "q1.csv");
        assert_eq!(files[0].size, "4");
        assert_eq!(files[0].last_modified, "2021-03-01T10:00:00Z");
    }

    #[test]
    fn headers_tolerate_spacing_and_case() {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet().set_name("FILES").unwrap();
        for (col, header) in ["File Path", "Check_Sum", "Size"].iter().enumerate() {
            sheet.write_string(0, col as u16, *header).unwrap();
        }
        sheet.write_string(1, 0, "content/a.txt").unwrap();
        sheet.write_string(1, 1, "abc").unwrap();
        sheet.write_number(1, 2, 12.0).unwrap();
        let bytes = workbook.save_to_buffer().unwrap();

        let metadata = parse(&bytes).unwrap();
        let file = &metadata.files["content"][0];
        assert_eq!(file.checksum, "abc");
        assert_eq!(file.size, "12");
        assert_eq!(file.filename, "a.txt");
        assert!(metadata.admin.is_none());
    }

    #[test]
    fn missing_files_sheet_or_columns_are_reported() {
        let mut workbook = Workbook::new();
        workbook.add_worksheet().set_name("Notes").unwrap();
        let bytes = workbook.save_to_buffer().unwrap();
        assert_eq!(parse(&bytes).unwrap_err(), vec!["workbook has no `Files` sheet".to_string()]);

        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet().set_name("Files").unwrap();
        sheet.write_string(0, 0, "filename").unwrap();
        let bytes = workbook.save_to_buffer().unwrap();
        let problems = parse(&bytes).unwrap_err();
        assert!(problems[0].contains("filepath, checksum"), "{problems:?}");
    }

    #[test]
    fn non_workbook_bytes_are_reported() {
        let problems = parse(b"PK not really").unwrap_err();
        assert!(problems[0].contains("could not be opened"));
    }
}
