//! Business rules applied before anything is forwarded upstream.
//!
//! Each mutating route owns a [`FormSchema`]: its required fields, the domain
//! rules that reject a request whatever its shape, and the field-level checks.

pub mod geo;
pub mod session;
pub mod validate;

use serde_json::{Map, Value};

use crate::errors::AppError;

pub use geo::{branch_coordinates, haversine_distance, GeofenceCheck};
pub use validate::Location;

type Check = fn(&Map<String, Value>) -> Result<(), AppError>;

pub struct FormSchema {
    pub required: &'static [&'static str],
    /// Evaluated before the required-field check.
    pub domain: Option<Check>,
    pub fields: Option<Check>,
}

impl FormSchema {
    pub fn validate(&self, data: &Map<String, Value>) -> Result<(), AppError> {
        if let Some(domain) = self.domain {
            domain(data)?;
        }
        validate::require_fields(data, self.required)?;
        match self.fields {
            Some(fields) => fields(data),
            None => Ok(()),
        }
    }
}

pub static DELIVERY: FormSchema = FormSchema {
    required: &[
        "branch",
        "helperName",
        "vehicleNumber",
        "deliveryTime",
        "storeName",
        "storeAddress",
        "invoiceNumber",
        "invoiceAmount",
        "paymentType",
        "deliveryCheckinPhoto",
        "location",
    ],
    domain: None,
    fields: Some(delivery_fields),
};

pub static EXPENSE: FormSchema = FormSchema {
    required: &["date", "branch", "licensePlate", "category", "subcategory", "amount"],
    domain: None,
    fields: Some(expense_fields),
};

pub static CHECK_IN: FormSchema = FormSchema {
    required: &[
        "branch",
        "vehicleNumber",
        "checkInTime",
        "initialOdometer",
        "checkInPhoto",
        "location",
    ],
    domain: None,
    fields: Some(check_in_fields),
};

pub static CHECK_OUT: FormSchema = FormSchema {
    required: &[
        "sessionId",
        "checkOutTime",
        "finalOdometer",
        "checkOutPhoto",
        "location",
    ],
    domain: Some(session::check_odometer),
    fields: Some(check_out_fields),
};

pub static LOGIN: FormSchema = FormSchema {
    required: &["email", "hashedPassword"],
    domain: None,
    fields: None,
};

pub static REGISTER: FormSchema = FormSchema {
    required: &["email", "hashedPassword", "fullName", "role", "branch"],
    domain: None,
    fields: None,
};

pub static FORGOT_PASSWORD: FormSchema = FormSchema {
    required: &["email"],
    domain: None,
    fields: None,
};

pub static RESET_PASSWORD: FormSchema = FormSchema {
    required: &["token", "hashedPassword"],
    domain: None,
    fields: None,
};

fn delivery_fields(data: &Map<String, Value>) -> Result<(), AppError> {
    validate::timestamp(data, "deliveryTime", "Format waktu pengiriman tidak valid")?;
    validate::positive_number(data, "invoiceAmount", "Nilai faktur harus berupa angka positif")?;
    validate::payment_type(data)?;
    validate::location(data)?;
    validate::image_upload(data, "deliveryCheckinPhoto")?;
    validate::optional_image_upload(data, "deliveryPhoto")?;
    validate::optional_image_upload(data, "paymentPhoto")
}

fn expense_fields(data: &Map<String, Value>) -> Result<(), AppError> {
    validate::positive_number(data, "amount", "Amount harus berupa angka positif")?;
    validate::timestamp(
        data,
        "date",
        "Format tanggal tidak valid. Gunakan format YYYY-MM-DD",
    )?;
    validate::optional_image_upload(data, "receiptPhoto")
}

fn check_in_fields(data: &Map<String, Value>) -> Result<(), AppError> {
    validate::positive_number(
        data,
        "initialOdometer",
        "Nilai odometer harus berupa angka positif",
    )?;
    validate::timestamp(data, "checkInTime", "Format waktu check-in tidak valid")?;
    validate::image_upload(data, "checkInPhoto")?;
    validate::location(data).map(|_| ())
}

fn check_out_fields(data: &Map<String, Value>) -> Result<(), AppError> {
    validate::positive_number(data, "finalOdometer", "Nilai odometer harus berupa angka positif")?;
    validate::timestamp(data, "checkOutTime", "Format waktu check-out tidak valid")?;
    validate::image_upload(data, "checkOutPhoto")?;
    validate::location(data).map(|_| ())
}
