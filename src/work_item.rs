//! Work items: one queued file holding one sales order.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RpaError};

/// Date formats accepted in order files.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%d.%m.%Y"];

/// Format the ERP date field expects.
const ERP_DATE_FORMAT: &str = "%d.%m.%Y";

/// One line of a sales order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub code: String,
    pub quantity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
}

/// The payload of a work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesOrder {
    /// Customer tax id.
    pub nit: String,
    pub order_number: String,
    pub delivery_date: String,
    pub items: Vec<OrderLine>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    /// Fields this tool does not use, kept for the receipt.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SalesOrder {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.nit.trim().is_empty() {
            return Err("nit is empty".into());
        }
        if self.order_number.trim().is_empty() {
            return Err("order_number is empty".into());
        }
        self.parsed_delivery_date()?;
        if self.items.is_empty() {
            return Err("order has no items".into());
        }
        for (index, line) in self.items.iter().enumerate() {
            if line.code.trim().is_empty() {
                return Err(format!("item {index} has an empty code"));
            }
            if !(line.quantity.is_finite() && line.quantity > 0.0) {
                return Err(format!(
                    "item {index} ({}) has invalid quantity {}",
                    line.code, line.quantity
                ));
            }
        }
        Ok(())
    }

    pub fn parsed_delivery_date(&self) -> std::result::Result<NaiveDate, String> {
        let raw = self.delivery_date.trim();
        DATE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
            .ok_or_else(|| format!("unrecognized delivery_date '{raw}'"))
    }

    /// The delivery date as typed into the ERP.
    pub fn erp_delivery_date(&self) -> std::result::Result<String, String> {
        Ok(self
            .parsed_delivery_date()?
            .format(ERP_DATE_FORMAT)
            .to_string())
    }
}

/// Quantities are typed without a trailing `.0` for whole numbers.
pub fn format_quantity(quantity: f64) -> String {
    if quantity.fract() == 0.0 && quantity.abs() < 1e15 {
        format!("{}", quantity as i64)
    } else {
        format!("{quantity}")
    }
}

/// One unit of work backed by one file.
#[derive(Debug, Clone)]
pub struct WorkItem {
    /// File name, e.g. `order1.json`.
    pub id: String,
    /// Where the backing file currently lives.
    pub path: PathBuf,
    pub payload: SalesOrder,
}

impl WorkItem {
    /// Read and validate the order at `path`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let id = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| RpaError::InvalidWorkItem {
                id: path.display().to_string(),
                reason: "file name is not valid UTF-8".into(),
            })?;
        let contents = std::fs::read_to_string(path)?;
        let payload: SalesOrder =
            serde_json::from_str(&contents).map_err(|e| RpaError::InvalidWorkItem {
                id: id.clone(),
                reason: e.to_string(),
            })?;
        payload
            .validate()
            .map_err(|reason| RpaError::InvalidWorkItem {
                id: id.clone(),
                reason,
            })?;
        Ok(Self {
            id,
            path: path.to_path_buf(),
            payload,
        })
    }

    /// File name without extension.
    pub fn stem(&self) -> &str {
        Path::new(&self.id)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.id)
    }

    #[cfg(test)]
    pub fn sample(id: &str) -> Self {
        Self {
            id: id.to_string(),
            path: PathBuf::from(id),
            payload: sample_order(),
        }
    }
}

#[cfg(test)]
pub fn sample_order() -> SalesOrder {
    serde_json::from_value(serde_json::json!({
        "nit": "900123456",
        "order_number": "OC-2024-001",
        "delivery_date": "2024-03-15",
        "items": [
            {"code": "A-100", "quantity": 2.0},
            {"code": "B-200", "quantity": 1.5, "price": 12.5}
        ],
        "customer_name": "ACME"
    }))
    .unwrap()
}
