//! Overview statistics for the dashboard.
//!
//! Everything here is computed on demand over the caller's visible order
//! subset; nothing is stored. Staff therefore see figures for their own
//! queue while admins see the whole shop.

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::models::{Order, OrderStatus, PaymentMode};

/// Financial summary over a set of orders.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    /// Sum of order amounts.
    pub total_business: f64,
    /// Sum of advances received.
    pub total_advance: f64,
    /// Money still out in the market: business minus advances.
    pub total_pending: f64,
    /// Advances received in cash.
    pub cash_received: f64,
    /// Advances received through Online/UPI.
    pub online_received: f64,
    /// Jobs still waiting to be started.
    pub pending_jobs: usize,
}

/// Compute the stat tiles for a set of visible orders.
pub fn dashboard_stats(orders: &[Order]) -> DashboardStats {
    let total_business: f64 = orders.iter().map(|o| o.amount).sum();
    let total_advance: f64 = orders.iter().map(|o| o.advance).sum();

    let cash_received: f64 = orders
        .iter()
        .filter(|o| o.payment_mode == PaymentMode::Cash)
        .map(|o| o.advance)
        .sum();
    let online_received: f64 = orders
        .iter()
        .filter(|o| o.payment_mode.is_online())
        .map(|o| o.advance)
        .sum();

    DashboardStats {
        total_business,
        total_advance,
        total_pending: total_business - total_advance,
        cash_received,
        online_received,
        pending_jobs: orders
            .iter()
            .filter(|o| o.status == OrderStatus::Pending)
            .count(),
    }
}

/// One day of the trailing sales series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailySales {
    pub date: NaiveDate,
    /// Short weekday label for the chart axis ("Mon", "Tue", ...).
    pub label: String,
    pub sales: f64,
}

/// The trailing 7-day sales series, oldest day first, keyed by each
/// order's creation date. Days without orders report zero.
pub fn weekly_sales(orders: &[Order], today: NaiveDate) -> Vec<DailySales> {
    (0..7)
        .rev()
        .map(|days_ago| {
            let date = today - Duration::days(days_ago);
            let sales = orders
                .iter()
                .filter(|o| o.date == date)
                .map(|o| o.amount)
                .sum();
            DailySales {
                date,
                label: date.format("%a").to_string(),
                sales,
            }
        })
        .collect()
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Priority;

    fn order(amount: f64, advance: f64, mode: PaymentMode, status: OrderStatus, date: NaiveDate) -> Order {
        Order {
            id: format!("ORD-{amount}-{advance}"),
            customer_name: "Customer".to_string(),
            service_type: "Print".to_string(),
            status,
            priority: Priority::Medium,
            amount,
            date,
            assigned_to: String::new(),
            advance,
            payment_mode: mode,
            completed_at: None,
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).expect("valid date")
    }

    #[test]
    fn stats_split_cash_and_online_money() {
        let orders = vec![
            order(100.0, 50.0, PaymentMode::Cash, OrderStatus::Pending, day(10)),
            order(200.0, 80.0, PaymentMode::Online, OrderStatus::Processing, day(10)),
            order(300.0, 120.0, PaymentMode::Upi, OrderStatus::Completed, day(11)),
            order(50.0, 0.0, PaymentMode::Pending, OrderStatus::Pending, day(11)),
        ];
        let stats = dashboard_stats(&orders);
        assert_eq!(stats.total_business, 650.0);
        assert_eq!(stats.total_advance, 250.0);
        assert_eq!(stats.total_pending, 400.0);
        assert_eq!(stats.cash_received, 50.0);
        assert_eq!(stats.online_received, 200.0, "UPI counts as online");
        assert_eq!(stats.pending_jobs, 2);
    }

    #[test]
    fn stats_over_no_orders_are_zero() {
        let stats = dashboard_stats(&[]);
        assert_eq!(stats.total_business, 0.0);
        assert_eq!(stats.total_pending, 0.0);
        assert_eq!(stats.pending_jobs, 0);
    }

    #[test]
    fn weekly_series_covers_seven_days_oldest_first() {
        let today = day(10);
        let orders = vec![
            order(100.0, 0.0, PaymentMode::Pending, OrderStatus::Pending, day(10)),
            order(40.0, 0.0, PaymentMode::Pending, OrderStatus::Pending, day(10)),
            order(70.0, 0.0, PaymentMode::Pending, OrderStatus::Pending, day(7)),
            // Outside the window: too old.
            order(999.0, 0.0, PaymentMode::Pending, OrderStatus::Pending, day(3)),
        ];

        let series = weekly_sales(&orders, today);
        assert_eq!(series.len(), 7);
        assert_eq!(series[0].date, day(4), "window starts six days back");
        assert_eq!(series[6].date, today);
        assert_eq!(series[6].sales, 140.0, "same-day orders accumulate");
        assert_eq!(series[3].sales, 70.0);
        assert_eq!(series[0].sales, 0.0, "empty days report zero");
        assert_eq!(series[6].label, today.format("%a").to_string());
    }
}
