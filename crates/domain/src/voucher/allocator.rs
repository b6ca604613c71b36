//! Discount allocator: vouchers and amounts in, concrete discounts out.

use serde::{Deserialize, Serialize};

use crate::error::DiscountError;
use crate::order::{Money, SettlementBreakdown, ShopOrder};

use super::{Discount, Voucher};

/// Computes the discount a voucher grants.
///
/// `qualifying` is checked against the voucher's minimum purchase;
/// `discountable` is the amount the discount is taken from. They differ for
/// shipping vouchers, which qualify on the order subtotal but discount the
/// shipping fee. The result never exceeds `discountable`.
pub fn compute_discount(
    voucher: &Voucher,
    qualifying: Money,
    discountable: Money,
) -> Result<Money, DiscountError> {
    if qualifying < voucher.min_purchase {
        return Err(DiscountError::NotApplicable {
            code: voucher.code.clone(),
            reason: format!(
                "minimum purchase {} not reached (got {})",
                voucher.min_purchase, qualifying
            ),
        });
    }

    let raw = match voucher.discount {
        Discount::Percentage {
            rate_bps,
            max_discount,
        } => {
            let cap = max_discount.ok_or_else(|| DiscountError::MissingMaxDiscount {
                code: voucher.code.clone(),
            })?;
            discountable.apply_rate_bps(rate_bps).min(cap)
        }
        Discount::FixedAmount { amount } => amount,
    };

    Ok(raw.clamp_to(discountable))
}

/// Splits `total` across `weights` proportionally, using the largest
/// remainder method so the parts always sum to exactly `total`.
///
/// Ties on the remainder go to the earlier index. When every weight is zero
/// the total is split evenly.
pub fn distribute_pro_rata(total: Money, weights: &[Money]) -> Vec<Money> {
    if weights.is_empty() {
        return Vec::new();
    }

    let total_units = i128::from(total.amount());
    let clamped: Vec<i128> = weights
        .iter()
        .map(|w| i128::from(w.amount().max(0)))
        .collect();
    let weight_sum: i128 = clamped.iter().sum();
    let (weights, weight_sum) = if weight_sum == 0 {
        (vec![1; clamped.len()], clamped.len() as i128)
    } else {
        (clamped, weight_sum)
    };

    let mut shares = Vec::with_capacity(weights.len());
    let mut remainders = Vec::with_capacity(weights.len());
    for (index, weight) in weights.iter().enumerate() {
        let product = total_units * weight;
        shares.push(product / weight_sum);
        remainders.push((product % weight_sum, index));
    }

    let assigned: i128 = shares.iter().sum();
    let mut leftover = total_units - assigned;
    remainders.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    for (_, index) in remainders {
        if leftover == 0 {
            break;
        }
        shares[index] += 1;
        leftover -= 1;
    }

    shares.into_iter().map(|s| Money::new(s as i64)).collect()
}

/// One shop order's share of the platform-funded discounts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformShare {
    pub order_discount: Money,
    pub shipping_discount: Money,
}

/// Distributes platform voucher discounts across shop orders.
///
/// The order-level discount follows each shop's total after its own shop
/// discount; the shipping discount follows each shop's shipping fee.
pub fn allocate_platform_discounts(
    shops: &[ShopOrder],
    order_discount: Money,
    shipping_discount: Money,
) -> Vec<PlatformShare> {
    let totals: Vec<Money> = shops.iter().map(|s| s.total_amount).collect();
    let fees: Vec<Money> = shops.iter().map(|s| s.shipping_fee).collect();

    distribute_pro_rata(order_discount, &totals)
        .into_iter()
        .zip(distribute_pro_rata(shipping_discount, &fees))
        .map(|(order_discount, shipping_discount)| PlatformShare {
            order_discount,
            shipping_discount,
        })
        .collect()
}

/// Settlement owed to the shop for `shop`.
///
/// Commission is charged on the item subtotal. Platform-funded discounts are
/// recorded for the ledger but do not reduce what the shop is owed.
pub fn settlement_for(
    shop: &ShopOrder,
    share: &PlatformShare,
    commission_bps: u32,
) -> SettlementBreakdown {
    let commission_fee = shop.subtotal.apply_rate_bps(commission_bps);
    SettlementBreakdown {
        shop_order_id: shop.id,
        shop_id: shop.shop_id.clone(),
        order_subtotal: shop.subtotal,
        shop_voucher_discount: shop.total_discount,
        shipping_fee: shop.shipping_fee,
        site_order_discount: share.order_discount,
        site_shipping_discount: share.shipping_discount,
        commission_fee,
        net_settled_amount: shop.subtotal - shop.total_discount - commission_fee,
    }
}
