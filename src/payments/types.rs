use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How the payer settled the order, normalized from the gateway vocabulary
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Card,
    NetBanking,
    Upi,
    Wallet,
    Emi,
    BankTransfer,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "CARD",
            PaymentMethod::NetBanking => "NET_BANKING",
            PaymentMethod::Upi => "UPI",
            PaymentMethod::Wallet => "WALLET",
            PaymentMethod::Emi => "EMI",
            PaymentMethod::BankTransfer => "BANK_TRANSFER",
        }
    }

    /// Map the gateway's method string. Unknown values fall back to `Card`.
    pub fn from_gateway(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "card" => PaymentMethod::Card,
            "netbanking" => PaymentMethod::NetBanking,
            "upi" => PaymentMethod::Upi,
            "wallet" => PaymentMethod::Wallet,
            "emi" => PaymentMethod::Emi,
            "bank_transfer" => PaymentMethod::BankTransfer,
            _ => PaymentMethod::Card,
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CARD" => Ok(PaymentMethod::Card),
            "NET_BANKING" => Ok(PaymentMethod::NetBanking),
            "UPI" => Ok(PaymentMethod::Upi),
            "WALLET" => Ok(PaymentMethod::Wallet),
            "EMI" => Ok(PaymentMethod::Emi),
            "BANK_TRANSFER" => Ok(PaymentMethod::BankTransfer),
            other => Err(format!("unknown payment method: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateOrderRequest {
    pub amount: BigDecimal,
    pub currency: String,
    /// Merchant-side receipt, echoed back by the gateway
    pub receipt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewayOrder {
    pub order_id: String,
    /// Amount in the currency's minor unit (paise for INR)
    pub amount_minor: i64,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayRefund {
    pub refund_id: String,
    pub payment_id: String,
    pub amount: BigDecimal,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEventType {
    PaymentAuthorized,
    PaymentCaptured,
    OrderPaid,
    PaymentFailed,
    RefundProcessed,
    Other(String),
}

impl WebhookEventType {
    pub fn parse(value: &str) -> Self {
        match value {
            "payment.authorized" => WebhookEventType::PaymentAuthorized,
            "payment.captured" => WebhookEventType::PaymentCaptured,
            "order.paid" => WebhookEventType::OrderPaid,
            "payment.failed" => WebhookEventType::PaymentFailed,
            "refund.processed" => WebhookEventType::RefundProcessed,
            other => WebhookEventType::Other(other.to_string()),
        }
    }
}

/// Gateway callback, reduced to the fields the settlement flow acts on
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub event_type: WebhookEventType,
    pub order_id: Option<String>,
    pub payment_id: Option<String>,
    pub method: Option<PaymentMethod>,
    pub error_description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_method_mapping() {
        assert_eq!(PaymentMethod::from_gateway("upi"), PaymentMethod::Upi);
        assert_eq!(PaymentMethod::from_gateway("netbanking"), PaymentMethod::NetBanking);
        assert_eq!(PaymentMethod::from_gateway("bank_transfer"), PaymentMethod::BankTransfer);
        assert_eq!(PaymentMethod::from_gateway("cardless_emi"), PaymentMethod::Card);
        assert_eq!(PaymentMethod::from_gateway(""), PaymentMethod::Card);
    }

    #[test]
    fn method_db_representation_roundtrips() {
        for method in [PaymentMethod::Card, PaymentMethod::NetBanking, PaymentMethod::Emi] {
            assert_eq!(method.as_str().parse::<PaymentMethod>().unwrap(), method);
        }
        assert!("PAYPAL".parse::<PaymentMethod>().is_err());
    }

    #[test]
    fn method_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&PaymentMethod::NetBanking).unwrap();
        assert_eq!(json, "\"NET_BANKING\"");
    }

    #[test]
    fn webhook_event_type_parsing() {
        assert_eq!(
            WebhookEventType::parse("payment.captured"),
            WebhookEventType::PaymentCaptured
        );
        assert_eq!(
            WebhookEventType::parse("dispute.created"),
            WebhookEventType::Other("dispute.created".to_string())
        );
    }
}
