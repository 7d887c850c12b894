//! Fuzz tests - compare the engine against a naive reference matcher.
//!
//! The reference book uses plain BTreeMap price levels with identical
//! matching semantics (push then match tops, midpoint pricing, buyer
//! record first), so the two response streams must agree exactly.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crossbook::{response_ring, Matcher, Order, Response, ResponseKind, ResponseReader, Side};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

#[derive(Clone, Copy, Debug)]
struct RefOrder {
    guid: u64,
    trader_id: u32,
    trade_id: u32,
    price: i64,
    remaining: u32,
}

/// Naive but correct reference implementation.
struct RefMatcher {
    buys: BTreeMap<i64, VecDeque<RefOrder>>,
    sells: BTreeMap<i64, VecDeque<RefOrder>>,
    resting: HashMap<u64, Side>,
    seen: HashSet<u64>,
}

fn ref_midpoint(bid: i64, ask: i64) -> i64 {
    ask + ((bid - ask) >> 1)
}

impl RefMatcher {
    fn new() -> Self {
        Self {
            buys: BTreeMap::new(),
            sells: BTreeMap::new(),
            resting: HashMap::new(),
            seen: HashSet::new(),
        }
    }

    fn best_bid(&self) -> Option<i64> {
        self.buys.keys().next_back().copied()
    }

    fn best_ask(&self) -> Option<i64> {
        self.sells.keys().next().copied()
    }

    fn order_count(&self) -> usize {
        self.resting.len()
    }

    fn place(&mut self, order: &Order, side: Side) -> Vec<Response> {
        if !self.seen.insert(order.guid) {
            return Vec::new();
        }
        let entry = RefOrder {
            guid: order.guid,
            trader_id: order.trader_id,
            trade_id: order.trade_id,
            price: order.price,
            remaining: order.amount,
        };
        match side {
            Side::Buy => self.buys.entry(order.price).or_default().push_back(entry),
            Side::Sell => self.sells.entry(order.price).or_default().push_back(entry),
        }
        self.resting.insert(order.guid, side);
        self.match_loop()
    }

    fn match_loop(&mut self) -> Vec<Response> {
        let mut out = Vec::new();
        loop {
            let (b_price, s_price) = match (self.best_bid(), self.best_ask()) {
                (Some(b), Some(s)) => (b, s),
                _ => break,
            };
            if s_price > b_price {
                break;
            }
            let price = ref_midpoint(b_price, s_price);
            let mut buyer = self.buys.get_mut(&b_price).unwrap()[0];
            let mut seller = self.sells.get_mut(&s_price).unwrap()[0];
            let amount = buyer.remaining.min(seller.remaining);
            let buyer_kind = if buyer.remaining == amount {
                ResponseKind::Full
            } else {
                ResponseKind::Partial
            };
            let seller_kind = if seller.remaining == amount {
                ResponseKind::Full
            } else {
                ResponseKind::Partial
            };

            buyer.remaining -= amount;
            seller.remaining -= amount;
            if buyer.remaining == 0 {
                let q = self.buys.get_mut(&b_price).unwrap();
                q.pop_front();
                if q.is_empty() {
                    self.buys.remove(&b_price);
                }
                self.resting.remove(&buyer.guid);
            } else {
                self.buys.get_mut(&b_price).unwrap()[0] = buyer;
            }
            if seller.remaining == 0 {
                let q = self.sells.get_mut(&s_price).unwrap();
                q.pop_front();
                if q.is_empty() {
                    self.sells.remove(&s_price);
                }
                self.resting.remove(&seller.guid);
            } else {
                self.sells.get_mut(&s_price).unwrap()[0] = seller;
            }

            out.push(Response {
                price: -price,
                amount,
                trade_id: buyer.trade_id,
                counter_party: seller.trader_id,
                kind: buyer_kind,
            });
            out.push(Response {
                price,
                amount,
                trade_id: seller.trade_id,
                counter_party: buyer.trader_id,
                kind: seller_kind,
            });
        }
        out
    }

    fn cancel(&mut self, order: &Order) -> Vec<Response> {
        if let Some(side) = self.resting.remove(&order.guid) {
            let book = match side {
                Side::Buy => &mut self.buys,
                Side::Sell => &mut self.sells,
            };
            let mut found = None;
            let mut empty_price = None;
            for (&price, queue) in book.iter_mut() {
                if let Some(pos) = queue.iter().position(|o| o.guid == order.guid) {
                    found = queue.remove(pos);
                    if queue.is_empty() {
                        empty_price = Some(price);
                    }
                    break;
                }
            }
            if let Some(price) = empty_price {
                book.remove(&price);
            }
            let gone = found.expect("Resting map out of sync with book");
            vec![Response {
                price: gone.price,
                amount: gone.remaining,
                trade_id: gone.trade_id,
                counter_party: gone.trader_id,
                kind: ResponseKind::Cancelled,
            }]
        } else {
            vec![Response {
                price: order.price,
                amount: order.amount,
                trade_id: order.trade_id,
                counter_party: order.trader_id,
                kind: ResponseKind::NotCancelled,
            }]
        }
    }

    fn submit(&mut self, order: &Order) -> Vec<Response> {
        match order.kind {
            crossbook::Kind::Buy => self.place(order, Side::Buy),
            crossbook::Kind::Sell => self.place(order, Side::Sell),
            crossbook::Kind::Cancel => self.cancel(order),
        }
    }
}

fn drain(reader: &mut ResponseReader) -> Vec<Response> {
    let mut out = Vec::new();
    while let Some(r) = reader.pop() {
        out.push(r);
    }
    out
}

fn random_place(rng: &mut ChaCha8Rng, guid: u64) -> Order {
    let trader = rng.gen_range(1..100);
    let trade = guid as u32;
    let price = rng.gen_range(980..1020);
    let amount = rng.gen_range(1..200);
    if rng.gen_bool(0.5) {
        Order::buy(guid, 1, trader, trade, price, amount)
    } else {
        Order::sell(guid, 1, trader, trade, price, amount)
    }
}

#[test]
fn test_fuzz_against_reference() {
    const SEED: u64 = 0xFEED_FACE;
    const OPS: usize = 20_000;

    let mut rng = ChaCha8Rng::seed_from_u64(SEED);
    let (writer, mut reader) = response_ring(1 << 14);
    let mut engine = Matcher::new(100_000, writer);
    let mut reference = RefMatcher::new();

    let mut next_guid = 1u64;
    let mut active: Vec<u64> = Vec::new();

    for op in 0..OPS {
        let order = if active.is_empty() || rng.gen_bool(0.7) {
            let order = random_place(&mut rng, next_guid);
            active.push(next_guid);
            next_guid += 1;
            order
        } else {
            let pick = rng.gen_range(0..active.len());
            let guid = active.swap_remove(pick);
            Order::cancel(guid, 1, 0, 0)
        };

        engine.submit(&order).unwrap();
        let got = drain(&mut reader);
        let expected = reference.submit(&order);

        assert_eq!(
            got, expected,
            "Response stream diverged at op {} ({:?})",
            op, order
        );
        assert_eq!(engine.best_bid(), reference.best_bid(), "Best bid at op {}", op);
        assert_eq!(engine.best_ask(), reference.best_ask(), "Best ask at op {}", op);

        if op % 500 == 0 {
            assert_eq!(engine.order_count(), reference.order_count());
            engine.book().validate();
        }
    }

    engine.book().validate();
    assert_eq!(engine.order_count(), reference.order_count());
    println!(
        "Fuzz passed: {} ops, {} responses, {} resting",
        OPS,
        engine.writes(),
        engine.order_count()
    );
}

#[test]
fn test_zero_sum_cash_flow() {
    const SEED: u64 = 0xBADC_0DE;
    const OPS: usize = 10_000;

    let mut rng = ChaCha8Rng::seed_from_u64(SEED);
    let (writer, mut reader) = response_ring(1 << 14);
    let mut engine = Matcher::new(100_000, writer);

    let mut cash_total = 0i128;
    for guid in 0..OPS as u64 {
        engine.submit(&random_place(&mut rng, guid)).unwrap();
        let responses = drain(&mut reader);

        // Fill records arrive in buyer/seller pairs with opposite cash flow
        for pair in responses.chunks(2) {
            let buyer = &pair[0];
            let seller = &pair[1];
            assert_eq!(buyer.price, -seller.price);
            assert_eq!(buyer.amount, seller.amount);
            cash_total += buyer.price as i128 * buyer.amount as i128;
            cash_total += seller.price as i128 * seller.amount as i128;
        }
    }
    assert_eq!(cash_total, 0, "Matched cash flow must sum to zero");
}

#[test]
fn test_fifo_order_within_price_level() {
    let (writer, mut reader) = response_ring(1 << 8);
    let mut engine = Matcher::new(1024, writer);

    // Twenty sells at one price, then sweep half of them
    for guid in 0..20u64 {
        engine
            .submit(&Order::sell(guid, 1, guid as u32, guid as u32, 100, 10))
            .unwrap();
    }
    assert_eq!(
        engine.book().side_guids(Side::Sell),
        (0..20u64).collect::<Vec<_>>()
    );

    engine.submit(&Order::buy(100, 1, 50, 50, 100, 100)).unwrap();
    let responses = drain(&mut reader);
    let makers: Vec<u32> = responses
        .iter()
        .filter(|r| r.price > 0)
        .map(|r| r.trade_id)
        .collect();
    assert_eq!(makers, (0..10u32).collect::<Vec<_>>(), "Earliest sells fill first");

    assert_eq!(
        engine.book().side_guids(Side::Sell),
        (10..20u64).collect::<Vec<_>>()
    );
    engine.book().validate();
}
