/// A parsed coin string, e.g. `123uatom` or `42ibc/ABC123`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coin {
    pub amount: String,
    pub denom: String,
}

/// Parse a concatenated amount+denom string. The denom starts with a letter
/// or `/` and may contain word characters plus `/ : -`. Returns `None` when
/// the input does not match.
pub fn parse_coin(input: &str) -> Option<Coin> {
    let digits_end = input.find(|c: char| !c.is_ascii_digit())?;
    if digits_end == 0 {
        return None;
    }
    let (amount, denom) = input.split_at(digits_end);

    let mut chars = denom.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic() && first != '/' {
        return None;
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '/' | ':' | '-')) {
        return None;
    }

    Some(Coin {
        amount: amount.to_string(),
        denom: denom.to_string(),
    })
}
