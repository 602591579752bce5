//! Canned-intent fast path.
//!
//! A frozen, ordered table of `(category, pattern, reply)` built once on
//! first use. Messages are lower-cased and trimmed, then tested against each
//! pattern in order; the first match wins and its reply is returned without
//! calling the model.
//!
//! Patterns target generic FAQ phrasings. Questions about a specific
//! product, order or date are left for the model and the function catalog.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentCategory {
    Greeting,
    Product,
    Order,
    Price,
    Delivery,
    Payment,
    Quality,
    Expiry,
    Promotion,
    Return,
    Account,
    Thanks,
    Goodbye,
    Support,
}

pub struct Intent {
    pub category: IntentCategory,
    pattern: Regex,
    pub reply: &'static str,
}

const SOURCES: &[(IntentCategory, &str, &str)] = &[
    (
        IntentCategory::Greeting,
        r"^(hi|hello|hey|hiya|greetings|good (morning|afternoon|evening))( there)?[\s!.,]*$",
        "Hello! Welcome to our grocery delivery support. How can I help you today? \
         You can ask about products, orders, delivery, payment or promotions.",
    ),
    (
        IntentCategory::Product,
        r"\b(what|which) (products|items|groceries) (do you|you) (sell|have|offer|carry)\b|\b(product|item) (catalog|catalogue|range)\b",
        "We carry fresh produce, dairy, bakery, meat and seafood, pantry staples, drinks and household \
         essentials. Browse the categories in the app or search for a product by name to see what is in stock.",
    ),
    (
        IntentCategory::Order,
        r"\b(track|tracking)\b.*\border\b|\bwhere('s| is) my order\b|\border status\b",
        "You can follow your order in real time from the Orders tab in the app. \
         Each order shows its current status, from confirmed to out for delivery to delivered.",
    ),
    (
        IntentCategory::Price,
        r"\bprice (match|matching|list)\b|\bhow (are|do you set) (your )?prices\b|\bwhy (is|are) .*(expensive|pricey)\b",
        "Prices are shown on every product page and are updated daily to match market prices. \
         The price you see at checkout is the price you pay.",
    ),
    (
        IntentCategory::Delivery,
        r"\b(delivery|shipping) (fees?|costs?|charges?|times?|hours|areas?|zones?|slots?)\b|\bhow long (does|will) (delivery|shipping|it take)\b|\bdo you deliver\b",
        "We deliver every day between 8am and 9pm. Choose a delivery slot at checkout. \
         Delivery is free above the minimum order value shown in the cart.",
    ),
    (
        IntentCategory::Payment,
        r"\bpayment (methods?|options?)\b|\bpay (by|with|using)\b|\baccept (credit cards?|cards?|cash|paypal)\b|\bcash on delivery\b",
        "We accept credit and debit cards, e-wallets and cash on delivery. \
         Card payments are processed securely and you are only charged once your order is confirmed.",
    ),
    (
        IntentCategory::Quality,
        r"\b(fresh(ness)?|quality) (guarantee|guaranteed|policy|check|checks)\b|\b(damaged|spoiled|rotten|bad|broken) (items?|products?|food|produce|goods)\b",
        "Every order is checked for freshness before it leaves the store. \
         If anything arrives damaged or below standard, send us a photo within 24 hours and we will replace or refund it.",
    ),
    (
        IntentCategory::Expiry,
        r"\b(expiry|expiration) (date )?polic(y|ies)\b|\bwhere (can i|do i|to) (find|see|check) (the )?(expiry|expiration|best before) dates?\b",
        "Expiry dates are printed on the packaging and listed on each product page. \
         We never deliver items past their expiry date, and fresh items always have at least two days of shelf life.",
    ),
    (
        IntentCategory::Promotion,
        r"\b(promo|promotion|discount|coupon|voucher) codes?\b|\bhow (do i|to|can i) (use|apply|redeem) (a |my |the )?(promo|promotion|coupon|voucher|discount)",
        "Enter your promo or voucher code in the cart before checkout and the discount is applied immediately. \
         Only one code can be used per order.",
    ),
    (
        IntentCategory::Return,
        r"\b(return|refund|exchange) polic(y|ies)\b|\bhow (do i|can i|to) (return|get a refund|request a refund|exchange)\b",
        "You can request a return or refund from the order details page within 24 hours of delivery. \
         Refunds go back to your original payment method within 3 to 5 business days.",
    ),
    (
        IntentCategory::Account,
        r"\b(reset|forgot|forgotten|change) (my )?password\b|\b(create|delete|close|update) (an |my )?account\b|\bsign ?up\b",
        "You can manage your account from the Profile tab: update your details, change your password \
         or delete your account. If you forgot your password, use the reset link on the login screen.",
    ),
    (
        IntentCategory::Thanks,
        r"^(thanks|thank you|thx|ty|cheers|much appreciated)( (so|very) much)?( for (your|the) help)?[\s!.,]*$",
        "You're welcome! Is there anything else I can help you with?",
    ),
    (
        IntentCategory::Goodbye,
        r"^(bye|goodbye|bye bye|see you|see ya|have a (good|nice) (day|one))[\s!.,]*$",
        "Goodbye, and thank you for shopping with us! Have a great day.",
    ),
    (
        IntentCategory::Support,
        r"\b(talk|speak|chat) (to|with) (a |an )?(human|person|agent|staff|representative)\b|\bcustomer (service|support)\b|\bcontact (you|support|us)\b",
        "I've noted your request for a staff member. Someone from our support team will reply in this chat shortly.",
    ),
];

static INTENTS: LazyLock<Vec<Intent>> = LazyLock::new(|| {
    SOURCES
        .iter()
        .filter_map(|(category, pattern, reply)| match Regex::new(pattern) {
            Ok(pattern) => Some(Intent {
                category: *category,
                pattern,
                reply: *reply,
            }),
            Err(e) => {
                warn!(?category, error = %e, "intent pattern failed to compile; skipping");
                None
            }
        })
        .collect()
});

/// The compiled table, in match order.
pub fn intents() -> &'static [Intent] {
    &INTENTS
}

/// First intent matching `message`, if any.
pub fn classify(message: &str) -> Option<&'static Intent> {
    let normalized = message.trim().to_lowercase();
    if normalized.is_empty() {
        return None;
    }
    intents().iter().find(|i| i.pattern.is_match(&normalized))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(message: &str) -> Option<IntentCategory> {
        classify(message).map(|i| i.category)
    }

    #[test]
    fn every_pattern_compiles() {
        assert_eq!(intents().len(), SOURCES.len());
    }

    #[test]
    fn table_order_is_fixed() {
        let order: Vec<IntentCategory> = intents().iter().map(|i| i.category).collect();
        assert_eq!(order.first(), Some(&IntentCategory::Greeting));
        assert_eq!(order.last(), Some(&IntentCategory::Support));
    }

    #[test]
    fn recognizes_common_phrasings() {
        assert_eq!(category("  Hello! "), Some(IntentCategory::Greeting));
        assert_eq!(category("Where is my order?"), Some(IntentCategory::Order));
        assert_eq!(category("What are the delivery fees?"), Some(IntentCategory::Delivery));
        assert_eq!(category("Can I pay with PayPal?"), Some(IntentCategory::Payment));
        assert_eq!(category("What's your refund policy"), Some(IntentCategory::Return));
        assert_eq!(category("I forgot my password"), Some(IntentCategory::Account));
        assert_eq!(category("thank you so much!"), Some(IntentCategory::Thanks));
        assert_eq!(category("Bye"), Some(IntentCategory::Goodbye));
        assert_eq!(category("Can I talk to a human"), Some(IntentCategory::Support));
    }

    #[test]
    fn specific_questions_fall_through() {
        assert_eq!(category("When does the whole milk expire?"), None);
        assert_eq!(category("Which products expire in the next 7 days?"), None);
        assert_eq!(category("hi, is the sourdough in stock?"), None);
        assert_eq!(category(""), None);
    }

    #[test]
    fn first_match_wins() {
        // Matches both order and support; order comes first.
        assert_eq!(
            category("contact support to track my order"),
            Some(IntentCategory::Order)
        );
    }

    #[test]
    fn replies_are_non_empty() {
        assert!(intents().iter().all(|i| !i.reply.trim().is_empty()));
    }
}
