//! Bill computation
//!
//! Turns one meter-reading row plus the upload's tariff configuration into the
//! stored bill fields. All money math is `Decimal`; each stored figure is rounded
//! to cents before it feeds the next one, so `subtotal + vat_amount == total`
//! holds exactly. Inputs are first rounded to the scale of their columns in
//! `final_billing_data`, so a bill recomputed from its stored row matches.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

use crate::defaults::{MAX_EXTRA_CHARGES, MISSING_SERIAL_EXAMPLES};
use crate::error::{BillingError, BillingResult};
use crate::services::csv_ingest::CsvRow;
use crate::types::{BillFields, ExtraCharge};

/// Decimal places kept by `upload_tariff_sar NUMERIC(12, 4)`
pub const TARIFF_SCALE: u32 = 4;
/// Decimal places kept by `vat_percent NUMERIC(6, 3)`
pub const VAT_SCALE: u32 = 3;
/// Decimal places kept by the `NUMERIC(14, 3)` volume columns
pub const VOLUME_SCALE: u32 = 3;

fn round_to(value: Decimal, scale: u32) -> Decimal {
    value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero)
}

/// Validated tariff configuration for one billing upload
#[derive(Debug, Clone)]
pub struct BillingParams {
    pub bill_month: String,
    pub tariff: Decimal,
    pub vat_percent: Decimal,
    pub extra_charges: Vec<ExtraCharge>,
}

impl BillingParams {
    /// Validate the upload form.
    ///
    /// Charges with a blank description or a non-positive rate are dropped
    /// before the three-charge limit is applied.
    pub fn new(
        bill_month: &str,
        tariff: Decimal,
        vat_percent: Decimal,
        extra_charges: &[ExtraCharge],
    ) -> BillingResult<Self> {
        let bill_month = bill_month.trim();
        let tariff = round_to(tariff, TARIFF_SCALE);
        let vat_percent = round_to(vat_percent, VAT_SCALE);
        if !is_valid_month(bill_month) {
            return Err(BillingError::InvalidInput(format!(
                "Invalid bill month '{}', expected YYYY-MM",
                bill_month
            )));
        }
        if tariff <= Decimal::ZERO {
            return Err(BillingError::InvalidInput("Tariff must be positive".into()));
        }
        if vat_percent < Decimal::ZERO {
            return Err(BillingError::InvalidInput("VAT must be a non-negative number".into()));
        }

        let extra_charges: Vec<ExtraCharge> = extra_charges
            .iter()
            .filter(|c| !c.description.trim().is_empty() && c.rate > Decimal::ZERO)
            .map(|c| ExtraCharge {
                description: c.description.trim().to_string(),
                rate: round_money(c.rate),
            })
            .collect();
        if extra_charges.len() > MAX_EXTRA_CHARGES {
            return Err(BillingError::InvalidInput(format!(
                "At most {} extra charges are allowed",
                MAX_EXTRA_CHARGES
            )));
        }

        Ok(Self {
            bill_month: bill_month.to_string(),
            tariff,
            vat_percent,
            extra_charges,
        })
    }
}

fn is_valid_month(month: &str) -> bool {
    NaiveDate::parse_from_str(&format!("{}-01", month), "%Y-%m-%d").is_ok() && month.len() == 7
}

/// Monetary breakdown of one bill
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillBreakdown {
    pub consumption_charge: Decimal,
    pub extra_total: Decimal,
    pub subtotal: Decimal,
    pub vat_amount: Decimal,
    pub total: Decimal,
}

pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// `amount * percent / 100`, unrounded
pub fn vat_of(amount: Decimal, vat_percent: Decimal) -> Decimal {
    amount * vat_percent / dec!(100)
}

pub fn compute_breakdown(
    net_consumption_m3: Decimal,
    tariff: Decimal,
    vat_percent: Decimal,
    extra_charges: &[ExtraCharge],
) -> BillBreakdown {
    let consumption_charge = round_money(tariff * net_consumption_m3);
    let extra_total: Decimal = extra_charges.iter().map(|c| c.rate).sum();
    let subtotal = round_money(consumption_charge + extra_total);
    let vat_amount = round_money(vat_of(subtotal, vat_percent));

    BillBreakdown {
        consumption_charge,
        extra_total,
        subtotal,
        vat_amount,
        total: subtotal + vat_amount,
    }
}

/// Why a single row produced no bill
#[derive(Debug)]
pub enum RowError {
    /// Device has no reference entry; collected, not fatal on its own
    MissingReference(String),
    Invalid(BillingError),
}

/// Compute the bill for one reading row.
///
/// `reference` maps device serial to customer name for the uploading tenant.
pub fn compute_bill(
    row: &CsvRow,
    reference: &HashMap<String, String>,
    params: &BillingParams,
) -> Result<BillFields, RowError> {
    let serial = row.value("device.serialNo").trim().to_string();
    let customer_name = match reference.get(&serial) {
        Some(name) if !name.is_empty() => name.clone(),
        _ => return Err(RowError::MissingReference(serial)),
    };

    let invalid = |field: &str| {
        RowError::Invalid(BillingError::InvalidNumber {
            serial: serial.clone(),
            field: field.to_string(),
        })
    };

    let net_consumption_m3 = parse_decimal(row.value("Net Consumption (m3)"))
        .map(|v| round_to(v, VOLUME_SCALE))
        .ok_or_else(|| invalid("Net Consumption (m3)"))?;
    let final_reading_timestamp =
        parse_csv_date(row.value("values.timestamp")).ok_or_else(|| invalid("values.timestamp"))?;
    let bill_start_date = parse_csv_date(row.value("Bill Duration Start Date"))
        .ok_or_else(|| invalid("Bill Duration Start Date"))?
        .date();

    let breakdown = compute_breakdown(
        net_consumption_m3,
        params.tariff,
        params.vat_percent,
        &params.extra_charges,
    );

    let mut bill = BillFields {
        upload_month: params.bill_month.clone(),
        device_serialno: serial,
        customer_name,
        final_reading_timestamp,
        final_reading_volume_m3: parse_decimal(row.value("values.volume.main (m3)"))
            .map(|v| round_to(v, VOLUME_SCALE)),
        customer_hash: row.value("Customer #").trim().to_string(),
        building_hash: row.value("Building #").trim().to_string(),
        apartment_hash: row.value("Apartment #").trim().to_string(),
        bill_start_date,
        bill_end_date: parse_csv_date(row.value("Bill Duration End Date")).map(|d| d.date()),
        net_consumption_m3,
        invoice_date_csv: parse_csv_date(row.value("Invoice Date")).map(|d| d.date()),
        upload_tariff_sar: params.tariff,
        vat_percent: params.vat_percent,
        total_bill_amount_sar: breakdown.total,
        csv_charge_1_desc: None,
        csv_charge_1_rate: Decimal::ZERO,
        csv_charge_2_desc: None,
        csv_charge_2_rate: Decimal::ZERO,
        csv_charge_3_desc: None,
        csv_charge_3_rate: Decimal::ZERO,
    };
    bill.set_extra_charges(&params.extra_charges);

    Ok(bill)
}

/// Compute bills for every row of an upload, in file order.
///
/// Rows without a reference entry are collected across the whole file and
/// reported together; a row with an unparseable number or required date fails
/// the batch immediately.
pub fn compute_batch(
    rows: &[CsvRow],
    reference: &HashMap<String, String>,
    params: &BillingParams,
) -> BillingResult<Vec<BillFields>> {
    let mut bills = Vec::with_capacity(rows.len());
    let mut missing: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for row in rows {
        match compute_bill(row, reference, params) {
            Ok(bill) => bills.push(bill),
            Err(RowError::MissingReference(serial)) => {
                if seen.insert(serial.clone()) {
                    missing.push(serial);
                }
            }
            Err(RowError::Invalid(e)) => return Err(e),
        }
    }

    if !missing.is_empty() {
        let count = missing.len();
        missing.truncate(MISSING_SERIAL_EXAMPLES);
        return Err(BillingError::MissingReferenceData { count, examples: missing });
    }

    Ok(bills)
}

/// Parse `DD/MM/YYYY` or `DD/MM/YYYY HH:MM[:SS]`; parts may be separated by
/// slashes, spaces or colons.
pub fn parse_csv_date(value: &str) -> Option<NaiveDateTime> {
    let parts: Vec<u32> = value
        .split(|c: char| c == '/' || c == ':' || c.is_whitespace())
        .filter(|p| !p.is_empty())
        .map(|p| p.parse::<u32>().ok())
        .collect::<Option<Vec<_>>>()?;

    let date = match parts.as_slice() {
        [d, m, y, ..] if parts.len() == 3 || parts.len() >= 5 => {
            NaiveDate::from_ymd_opt(*y as i32, *m, *d)?
        }
        _ => return None,
    };

    if parts.len() >= 5 {
        date.and_hms_opt(parts[3], parts[4], 0)
    } else {
        date.and_hms_opt(0, 0, 0)
    }
}

fn parse_decimal(value: &str) -> Option<Decimal> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    Decimal::from_str(value)
        .or_else(|_| Decimal::from_scientific(value))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(charges: &[ExtraCharge]) -> BillingParams {
        BillingParams::new("2026-03", dec!(5.00), dec!(15), charges).unwrap()
    }

    fn charge(desc: &str, rate: Decimal) -> ExtraCharge {
        ExtraCharge { description: desc.to_string(), rate }
    }

    fn reading(serial: &str, net: &str) -> CsvRow {
        CsvRow::from_pairs(
            1,
            &[
                ("device.serialNo", serial),
                ("values.timestamp", "31/03/2026 23:00"),
                ("values.volume.main (m3)", "1234.5"),
                ("Customer #", "C-1"),
                ("Building #", "B-1"),
                ("Apartment #", "A-1"),
                ("Bill Duration Start Date", "01/03/2026"),
                ("Bill Duration End Date", "31/03/2026"),
                ("Net Consumption (m3)", net),
                ("Invoice Date", "02/04/2026"),
            ],
        )
    }

    fn lookup(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(s, n)| (s.to_string(), n.to_string())).collect()
    }

    #[test]
    fn test_breakdown_reference_scenario() {
        let b = compute_breakdown(dec!(100), dec!(5.00), dec!(15), &[charge("Fee", dec!(50.00))]);
        assert_eq!(b.consumption_charge, dec!(500.00));
        assert_eq!(b.subtotal, dec!(550.00));
        assert_eq!(b.vat_amount, dec!(82.50));
        assert_eq!(b.total, dec!(632.50));
    }

    #[test]
    fn test_breakdown_total_is_exact_sum_after_rounding() {
        let b = compute_breakdown(dec!(13.337), dec!(3.1415), dec!(15), &[charge("x", dec!(0.01))]);
        assert_eq!(b.subtotal + b.vat_amount, b.total);
        assert_eq!(b.subtotal.scale(), 2);
        assert_eq!(b.vat_amount, round_money(b.vat_amount));
    }

    #[test]
    fn test_breakdown_is_deterministic() {
        let charges = [charge("a", dec!(1.11)), charge("b", dec!(2.22))];
        let first = compute_breakdown(dec!(77.7), dec!(4.4444), dec!(5), &charges);
        let second = compute_breakdown(dec!(77.7), dec!(4.4444), dec!(5), &charges);
        assert_eq!(first, second);
        assert_eq!(first.total.to_string(), second.total.to_string());
    }

    #[test]
    fn test_zero_vat_total_equals_subtotal() {
        let b = compute_breakdown(dec!(10), dec!(2), dec!(0), &[]);
        assert_eq!(b.vat_amount, Decimal::ZERO);
        assert_eq!(b.total, dec!(20));
    }

    #[test]
    fn test_params_reject_non_positive_tariff() {
        let err = BillingParams::new("2026-03", dec!(0), dec!(15), &[]).unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[test]
    fn test_params_reject_negative_vat() {
        assert!(BillingParams::new("2026-03", dec!(1), dec!(-1), &[]).is_err());
    }

    #[test]
    fn test_params_reject_bad_month() {
        for month in ["2026-13", "2026-3", "03-2026", ""] {
            assert!(BillingParams::new(month, dec!(1), dec!(0), &[]).is_err(), "{}", month);
        }
    }

    #[test]
    fn test_params_drop_blank_and_zero_charges() {
        let p = params(&[charge("", dec!(5)), charge("Meter", dec!(0)), charge(" Fee ", dec!(2.505))]);
        assert_eq!(p.extra_charges, vec![charge("Fee", dec!(2.51))]);
    }

    #[test]
    fn test_params_reject_more_than_three_charges() {
        let charges: Vec<_> = (0..4).map(|i| charge(&format!("c{}", i), dec!(1))).collect();
        assert!(BillingParams::new("2026-03", dec!(1), dec!(0), &charges).is_err());
    }

    #[test]
    fn test_compute_bill_fills_fields() {
        let p = params(&[charge("Service Fee", dec!(50))]);
        let bill = compute_bill(&reading(" M1 ", "100"), &lookup(&[("M1", "Acme")]), &p).unwrap();
        assert_eq!(bill.device_serialno, "M1");
        assert_eq!(bill.customer_name, "Acme");
        assert_eq!(bill.total_bill_amount_sar, dec!(632.50));
        assert_eq!(bill.csv_charge_1_desc.as_deref(), Some("Service Fee"));
        assert_eq!(bill.bill_start_date, NaiveDate::from_ymd_opt(2026, 3, 1).unwrap());
        assert_eq!(bill.invoice_date_csv, NaiveDate::from_ymd_opt(2026, 4, 2));
        assert_eq!(bill.final_reading_volume_m3, Some(dec!(1234.5)));
    }

    #[test]
    fn test_stored_inputs_reproduce_stored_total() {
        let p = BillingParams::new("2026-03", dec!(2.00005), dec!(15.0004), &[]).unwrap();
        assert_eq!(p.tariff, dec!(2.0001));
        assert_eq!(p.vat_percent, dec!(15.000));

        let bill = compute_bill(&reading("M1", "1000.0004"), &lookup(&[("M1", "Acme")]), &p).unwrap();
        assert_eq!(bill.net_consumption_m3, dec!(1000.000));
        assert_eq!(bill.total_bill_amount_sar, dec!(2300.12));

        // What an invoice recomputes from the row as Postgres stores it
        let again = compute_breakdown(
            round_to(bill.net_consumption_m3, VOLUME_SCALE),
            round_to(bill.upload_tariff_sar, TARIFF_SCALE),
            round_to(bill.vat_percent, VAT_SCALE),
            &bill.extra_charges(),
        );
        assert_eq!(again.total, bill.total_bill_amount_sar);
    }

    #[test]
    fn test_tariff_rounding_to_zero_rejected() {
        assert!(BillingParams::new("2026-03", dec!(0.00004), dec!(15), &[]).is_err());
    }

    #[test]
    fn test_compute_bill_invalid_consumption() {
        let result = compute_bill(&reading("M1", "abc"), &lookup(&[("M1", "Acme")]), &params(&[]));
        match result {
            Err(RowError::Invalid(BillingError::InvalidNumber { serial, field })) => {
                assert_eq!(serial, "M1");
                assert_eq!(field, "Net Consumption (m3)");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_compute_batch_collects_missing_references() {
        let rows = vec![reading("M1", "1"), reading("M3", "1"), reading("M3", "2"), reading("M4", "1")];
        let err = compute_batch(&rows, &lookup(&[("M1", "Acme")]), &params(&[])).unwrap_err();
        match err {
            BillingError::MissingReferenceData { count, examples } => {
                assert_eq!(count, 2);
                assert_eq!(examples, vec!["M3", "M4"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_compute_batch_caps_examples_at_five() {
        let rows: Vec<_> = (0..8).map(|i| reading(&format!("X{}", i), "1")).collect();
        match compute_batch(&rows, &HashMap::new(), &params(&[])) {
            Err(BillingError::MissingReferenceData { count, examples }) => {
                assert_eq!(count, 8);
                assert_eq!(examples.len(), 5);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_csv_date_forms() {
        let dt = parse_csv_date("05/03/2026 14:30").unwrap();
        assert_eq!(dt.to_string(), "2026-03-05 14:30:00");
        let d = parse_csv_date("05/03/2026").unwrap();
        assert_eq!(d.to_string(), "2026-03-05 00:00:00");
        assert!(parse_csv_date("05/03/2026 14:30:59").is_some());
    }

    #[test]
    fn test_parse_csv_date_rejects_garbage() {
        assert!(parse_csv_date("").is_none());
        assert!(parse_csv_date("2026-03-05").is_none());
        assert!(parse_csv_date("31/02/2026").is_none());
        assert!(parse_csv_date("05/03").is_none());
        assert!(parse_csv_date("05/03/2026 14").is_none());
    }
}
