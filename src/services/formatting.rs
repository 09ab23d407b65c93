/// Locale-style currency formatting for the confirmation response. Amounts
/// arrive in minor units from the provider.
pub fn format_minor_amount(minor: i64, currency: &str) -> String {
    let negative = minor < 0;
    let abs = minor.unsigned_abs();
    let units = abs / 100;
    let cents = abs % 100;

    let grouped = group_thousands(units);
    let sign = if negative { "-" } else { "" };

    match currency.to_lowercase().as_str() {
        "usd" => format!("{sign}${grouped}.{cents:02}"),
        "eur" => format!("{sign}\u{20ac}{grouped}.{cents:02}"),
        "gbp" => format!("{sign}\u{a3}{grouped}.{cents:02}"),
        other => format!("{sign}{} {grouped}.{cents:02}", other.to_uppercase()),
    }
}

fn group_thousands(mut value: u64) -> String {
    if value < 1000 {
        return value.to_string();
    }
    let mut groups = Vec::new();
    while value >= 1000 {
        groups.push(format!("{:03}", value % 1000));
        value /= 1000;
    }
    let mut out = value.to_string();
    for group in groups.iter().rev() {
        out.push(',');
        out.push_str(group);
    }
    out
}

/// Customer display name for the response: provider-reported name, then the
/// account's first name, then a generic placeholder.
pub fn display_name(provider_name: Option<&str>, first_name: Option<&str>) -> String {
    provider_name
        .filter(|n| !n.trim().is_empty())
        .or(first_name.filter(|n| !n.trim().is_empty()))
        .unwrap_or("Customer")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_usd_with_symbol() {
        assert_eq!(format_minor_amount(4999, "usd"), "$49.99");
        assert_eq!(format_minor_amount(0, "usd"), "$0.00");
        assert_eq!(format_minor_amount(100, "USD"), "$1.00");
    }

    #[test]
    fn groups_thousands() {
        assert_eq!(format_minor_amount(123_456_789, "usd"), "$1,234,567.89");
        assert_eq!(format_minor_amount(100_000, "eur"), "\u{20ac}1,000.00");
    }

    #[test]
    fn unknown_currency_uses_code_prefix() {
        assert_eq!(format_minor_amount(2500, "cad"), "CAD 25.00");
    }

    #[test]
    fn negative_amounts_keep_sign_before_symbol() {
        assert_eq!(format_minor_amount(-4999, "usd"), "-$49.99");
    }

    #[test]
    fn name_fallback_chain() {
        assert_eq!(display_name(Some("Dana Scout"), Some("Ada")), "Dana Scout");
        assert_eq!(display_name(None, Some("Ada")), "Ada");
        assert_eq!(display_name(Some("  "), None), "Customer");
        assert_eq!(display_name(None, None), "Customer");
    }
}
