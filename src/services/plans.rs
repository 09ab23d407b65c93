use crate::entities::subscription::PlanTier;

/// Minor-unit amount thresholds for the keyword fallback. USD-specific by
/// upstream design; do not generalize without product input.
const PREMIUM_AMOUNT_THRESHOLD: i64 = 7900;
const BASIC_AMOUNT_THRESHOLD: i64 = 2900;

/// Maps an opaque upstream price descriptor to an internal plan tier.
///
/// The rule set is ordered and first-match-wins over the lower-cased nickname
/// (price id when the nickname is absent), with an amount fallback. The
/// keywords mirror how plans are named on the provider dashboard; tier drives
/// feature entitlement downstream, so the order is load-bearing.
pub fn classify(nickname: Option<&str>, price_id: &str, unit_amount: Option<i64>) -> PlanTier {
    let haystack = nickname
        .filter(|n| !n.trim().is_empty())
        .unwrap_or(price_id)
        .to_lowercase();

    if ["premium", "pro", "advanced"]
        .iter()
        .any(|kw| haystack.contains(kw))
    {
        return PlanTier::Premium;
    }
    if ["basic", "month", "standard"]
        .iter()
        .any(|kw| haystack.contains(kw))
    {
        return PlanTier::Basic;
    }
    if ["free", "trial"].iter().any(|kw| haystack.contains(kw)) {
        return PlanTier::Free;
    }

    match unit_amount.unwrap_or(0) {
        amount if amount >= PREMIUM_AMOUNT_THRESHOLD => PlanTier::Premium,
        amount if amount >= BASIC_AMOUNT_THRESHOLD => PlanTier::Basic,
        _ => PlanTier::Free,
    }
}
