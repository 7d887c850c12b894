//! Matcher - drives the book and writes responses to the output ring.
//!
//! `submit` is synchronous: on return, every response caused by the
//! submission is already in the ring, in the order it was produced. The
//! buyer-view record of a fill always immediately precedes the matching
//! seller-view record.

use thiserror::Error;
use tracing::{debug, trace};

use crate::arena::{OrderNode, NIL};
use crate::book::Book;
use crate::config::{Config, ConfigError};
use crate::order::{Kind, Order, Response, ResponseKind, Side};
use crate::ring::{response_ring, ResponseReader, ResponseWriter, RingFull};

/// A submission the engine refused to process.
///
/// None of these arise from well-formed input against a properly sized
/// engine; the book is left unchanged in every case except `Backpressure`,
/// where earlier responses of the same submission may already be in the
/// ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    /// Resting orders must have a positive amount
    #[error("order {guid} has zero amount")]
    ZeroAmount { guid: u64 },
    /// Resting orders must have a non-negative price
    #[error("order {guid} has negative price {price}")]
    NegativePrice { guid: u64, price: i64 },
    /// The order arena is exhausted
    #[error("book full, order {guid} dropped")]
    BookFull { guid: u64 },
    /// The output ring has no room for a response
    #[error("output ring backpressure")]
    Backpressure(#[from] RingFull),
}

/// Trade price for a crossed pair of price levels.
///
/// Half the spread above the ask; odd spreads round down. Matches the
/// generating table the property tests pin (`price(2,1) == 1`,
/// `price(21,10) == 15`, ...).
#[inline]
pub fn midpoint(bid: i64, ask: i64) -> i64 {
    debug_assert!(bid >= ask, "Midpoint requires a crossed pair");
    ask + ((bid - ask) >> 1)
}

/// The matching engine core.
pub struct Matcher {
    book: Book,
    output: ResponseWriter,
}

impl Matcher {
    /// Create a matcher over a book of `order_capacity` resting orders,
    /// publishing into `output`.
    pub fn new(order_capacity: u32, output: ResponseWriter) -> Self {
        Self {
            book: Book::new(order_capacity),
            output,
        }
    }

    /// Create a matcher and its response reader from a validated config.
    pub fn from_config(config: &Config) -> Result<(Self, ResponseReader), ConfigError> {
        config.validate()?;
        let (writer, reader) = response_ring(config.ring_capacity);
        Ok((Self::new(config.order_capacity, writer), reader))
    }

    /// Process one submission to completion.
    ///
    /// Cancels acknowledge with `Cancelled`/`NotCancelled`; Buy/Sell run
    /// the match loop and rest any residual. A duplicate guid is silently
    /// ignored.
    pub fn submit(&mut self, order: &Order) -> Result<(), SubmitError> {
        match order.kind {
            Kind::Cancel => self.cancel(order),
            Kind::Buy => self.place(order, Side::Buy),
            Kind::Sell => self.place(order, Side::Sell),
        }
    }

    fn cancel(&mut self, order: &Order) -> Result<(), SubmitError> {
        match self.book.cancel(order.guid) {
            Some(node) => {
                self.output.push(Response {
                    price: node.price,
                    amount: node.remaining,
                    trade_id: node.trade_id,
                    counter_party: node.trader_id,
                    kind: ResponseKind::Cancelled,
                })?;
            }
            None => {
                debug!(guid = order.guid, "cancel found nothing resting");
                self.output.push(Response {
                    price: order.price,
                    amount: order.amount,
                    trade_id: order.trade_id,
                    counter_party: order.trader_id,
                    kind: ResponseKind::NotCancelled,
                })?;
            }
        }
        Ok(())
    }

    fn place(&mut self, order: &Order, side: Side) -> Result<(), SubmitError> {
        if order.amount == 0 {
            return Err(SubmitError::ZeroAmount { guid: order.guid });
        }
        if order.price < 0 {
            return Err(SubmitError::NegativePrice {
                guid: order.guid,
                price: order.price,
            });
        }
        if !self.book.record_guid(order.guid) {
            debug!(guid = order.guid, "duplicate guid ignored");
            return Ok(());
        }
        if self.book.insert(order, side).is_none() {
            return Err(SubmitError::BookFull { guid: order.guid });
        }
        self.match_loop()
    }

    /// Trade the tops of book against each other until they no longer
    /// cross. At most one side gives partially per fill; on equal amounts
    /// both sides leave the book.
    fn match_loop(&mut self) -> Result<(), SubmitError> {
        loop {
            let b = self.book.peek(Side::Buy);
            let s = self.book.peek(Side::Sell);
            if b == NIL || s == NIL {
                return Ok(());
            }
            let (b_price, b_remaining) = {
                let node = self.book.node(b);
                (node.price, node.remaining)
            };
            let (s_price, s_remaining) = {
                let node = self.book.node(s);
                (node.price, node.remaining)
            };
            if s_price > b_price {
                return Ok(());
            }
            let price = midpoint(b_price, s_price);
            if b_remaining == s_remaining {
                let amount = s_remaining;
                let buyer = self.book.pop(Side::Buy, b);
                let seller = self.book.pop(Side::Sell, s);
                self.complete_trade(
                    ResponseKind::Full,
                    ResponseKind::Full,
                    &buyer,
                    &seller,
                    price,
                    amount,
                )?;
            } else if s_remaining > b_remaining {
                let amount = b_remaining;
                let buyer = self.book.pop(Side::Buy, b);
                self.book.reduce(s, amount);
                let seller = *self.book.node(s);
                self.complete_trade(
                    ResponseKind::Full,
                    ResponseKind::Partial,
                    &buyer,
                    &seller,
                    price,
                    amount,
                )?;
            } else {
                let amount = s_remaining;
                let seller = self.book.pop(Side::Sell, s);
                self.book.reduce(b, amount);
                let buyer = *self.book.node(b);
                self.complete_trade(
                    ResponseKind::Partial,
                    ResponseKind::Full,
                    &buyer,
                    &seller,
                    price,
                    amount,
                )?;
            }
        }
    }

    fn complete_trade(
        &mut self,
        buyer_kind: ResponseKind,
        seller_kind: ResponseKind,
        buyer: &OrderNode,
        seller: &OrderNode,
        price: i64,
        amount: u32,
    ) -> Result<(), SubmitError> {
        trace!(
            price,
            amount,
            buyer = buyer.trader_id,
            seller = seller.trader_id,
            "fill"
        );
        // Buyer record first; negative price = buyer pays
        self.output.push(Response {
            price: -price,
            amount,
            trade_id: buyer.trade_id,
            counter_party: seller.trader_id,
            kind: buyer_kind,
        })?;
        self.output.push(Response {
            price,
            amount,
            trade_id: seller.trade_id,
            counter_party: buyer.trader_id,
            kind: seller_kind,
        })?;
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Highest resting buy price.
    #[inline]
    pub fn best_bid(&self) -> Option<i64> {
        self.book.best_bid()
    }

    /// Lowest resting sell price.
    #[inline]
    pub fn best_ask(&self) -> Option<i64> {
        self.book.best_ask()
    }

    /// Number of resting orders.
    #[inline]
    pub fn order_count(&self) -> usize {
        self.book.order_count()
    }

    /// Lifetime count of responses published (diagnostics).
    #[inline]
    pub fn writes(&self) -> u64 {
        self.output.writes()
    }

    /// The underlying book, for inspection and validation.
    #[inline]
    pub fn book(&self) -> &Book {
        &self.book
    }
}
