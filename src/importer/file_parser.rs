// ==========================================
// 受益人登记系统 - 文件解析器实现
// ==========================================
// 职责: 上传文件 → 行数据（列名 → JSON 值）
// 支持: CSV / XLSX / XLS / ODS（按 content type 分派）
// 红线: 解析阶段不落库
// ==========================================

use crate::domain::upload::RowPayload;
use crate::importer::error::{ImportError, ImportResult};
use calamine::{Data, DataType, Ods, Reader, Xls, Xlsx};
use csv::ReaderBuilder;
use serde_json::{Number, Value};
use std::fmt::Display;
use std::io::Cursor;

pub const CONTENT_TYPE_CSV: &str = "text/csv";
pub const CONTENT_TYPE_XLSX: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const CONTENT_TYPE_XLS: &str = "application/vnd.ms-excel";
pub const CONTENT_TYPE_ODS: &str = "application/vnd.oasis.opendocument.spreadsheet";

// ==========================================
// ImportFile - 上传文件
// ==========================================
#[derive(Debug, Clone)]
pub struct ImportFile {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl ImportFile {
    pub fn new(filename: &str, content_type: &str, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            bytes,
        }
    }
}

/// 解析结果（表头 + 行）
#[derive(Debug, Clone, Default)]
pub struct ParsedTable {
    pub headers: Vec<String>,
    pub rows: Vec<RowPayload>,
}

impl ParsedTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// ==========================================
// FileParser Trait
// ==========================================
// 实现者: CsvParser, SpreadsheetParser
pub trait FileParser: Send + Sync {
    fn parse_bytes(&self, bytes: &[u8]) -> ImportResult<ParsedTable>;
}

// ==========================================
// CSV Parser 实现
// ==========================================
pub struct CsvParser;

impl FileParser for CsvParser {
    fn parse_bytes(&self, bytes: &[u8]) -> ImportResult<ParsedTable> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| ImportError::EncodingError(e.to_string()))?;
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true) // 允许行长度不一致
            .from_reader(text.as_bytes());

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result?;
            let mut row = RowPayload::new();

            for (col_idx, value) in record.iter().enumerate() {
                if let Some(header) = headers.get(col_idx) {
                    if header.is_empty() {
                        continue;
                    }
                    row.insert(header.clone(), infer_scalar(value));
                }
            }

            // 跳过完全空白的行
            if row.values().all(|v| v.is_null()) {
                continue;
            }
            rows.push(row);
        }

        Ok(ParsedTable {
            headers: headers.into_iter().filter(|h| !h.is_empty()).collect(),
            rows,
        })
    }
}

/// CSV 单元格类型推断：空 → null，整数/浮点 → number，其余 → string
fn infer_scalar(raw: &str) -> Value {
    let value = raw.trim();
    if value.is_empty() {
        return Value::Null;
    }
    if let Ok(n) = value.parse::<i64>() {
        return Value::Number(Number::from(n));
    }
    if let Ok(f) = value.parse::<f64>() {
        if let Some(n) = Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    Value::String(value.to_string())
}

// ==========================================
// 表格文件 Parser 实现（XLSX / XLS / ODS）
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpreadsheetFormat {
    Xlsx,
    Xls,
    Ods,
}

pub struct SpreadsheetParser {
    pub format: SpreadsheetFormat,
}

impl FileParser for SpreadsheetParser {
    fn parse_bytes(&self, bytes: &[u8]) -> ImportResult<ParsedTable> {
        let cursor = Cursor::new(bytes.to_vec());
        match self.format {
            SpreadsheetFormat::Xlsx => read_first_sheet(Xlsx::new(cursor).map_err(excel_err)?),
            SpreadsheetFormat::Xls => read_first_sheet(Xls::new(cursor).map_err(excel_err)?),
            SpreadsheetFormat::Ods => read_first_sheet(Ods::new(cursor).map_err(excel_err)?),
        }
    }
}

fn excel_err<E: Display>(e: E) -> ImportError {
    ImportError::ExcelParseError(e.to_string())
}

fn read_first_sheet<R>(mut workbook: R) -> ImportResult<ParsedTable>
where
    R: Reader<Cursor<Vec<u8>>>,
    R::Error: Display,
{
    let sheet_names = workbook.sheet_names();
    let sheet_name = sheet_names
        .first()
        .cloned()
        .ok_or_else(|| ImportError::ExcelParseError("文件无工作表".to_string()))?;

    let range = workbook.worksheet_range(&sheet_name).map_err(excel_err)?;

    // 提取表头（第一行）；空表返回空结果，由调用方判定 EmptyInput
    let mut sheet_rows = range.rows();
    let header_row = match sheet_rows.next() {
        Some(row) => row,
        None => return Ok(ParsedTable::default()),
    };

    let headers: Vec<String> = header_row
        .iter()
        .map(|cell| cell.to_string().trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for data_row in sheet_rows {
        let mut row = RowPayload::new();

        for (col_idx, cell) in data_row.iter().enumerate() {
            if let Some(header) = headers.get(col_idx) {
                if header.is_empty() {
                    continue;
                }
                row.insert(header.clone(), cell_to_value(cell));
            }
        }

        // 跳过完全空白的行
        if row.values().all(|v| v.is_null()) {
            continue;
        }
        rows.push(row);
    }

    Ok(ParsedTable {
        headers: headers.into_iter().filter(|h| !h.is_empty()).collect(),
        rows,
    })
}

fn cell_to_value(cell: &Data) -> Value {
    match cell {
        Data::Empty => Value::Null,
        Data::Int(i) => Value::Number(Number::from(*i)),
        Data::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
        Data::Bool(b) => Value::Bool(*b),
        Data::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                Value::Null
            } else {
                Value::String(s.to_string())
            }
        }
        Data::DateTime(_) => match cell.as_datetime() {
            Some(dt) if dt.time() == chrono::NaiveTime::MIN => {
                Value::String(dt.format("%Y-%m-%d").to_string())
            }
            Some(dt) => Value::String(dt.format("%Y-%m-%d %H:%M:%S").to_string()),
            None => Value::String(cell.to_string()),
        },
        // ODS 日期单元格以 ISO 文本给出
        Data::DateTimeIso(s) => Value::String(s.trim().to_string()),
        other => Value::String(other.to_string().trim().to_string()),
    }
}

// ==========================================
// FileLoader - 按 content type 分派
// ==========================================
pub struct FileLoader;

impl FileLoader {
    /// 选择解析器；不支持的类型返回 UnsupportedFormat
    pub fn parser_for(content_type: &str) -> ImportResult<Box<dyn FileParser>> {
        // 去掉 "; charset=..." 之类的参数
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_lowercase();

        match mime.as_str() {
            CONTENT_TYPE_CSV => Ok(Box::new(CsvParser)),
            CONTENT_TYPE_XLSX => Ok(Box::new(SpreadsheetParser {
                format: SpreadsheetFormat::Xlsx,
            })),
            CONTENT_TYPE_XLS => Ok(Box::new(SpreadsheetParser {
                format: SpreadsheetFormat::Xls,
            })),
            CONTENT_TYPE_ODS => Ok(Box::new(SpreadsheetParser {
                format: SpreadsheetFormat::Ods,
            })),
            _ => Err(ImportError::UnsupportedFormat(content_type.to_string())),
        }
    }

    /// 解析上传文件；空表返回 EmptyInput
    pub fn load(&self, file: &ImportFile) -> ImportResult<ParsedTable> {
        let parser = Self::parser_for(&file.content_type)?;
        let table = parser.parse_bytes(&file.bytes)?;
        if table.is_empty() {
            return Err(ImportError::EmptyInput(file.filename.clone()));
        }
        Ok(table)
    }
}
