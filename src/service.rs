use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::cancel::CancelSignal;
use crate::entities::Order;
use crate::options::Mode;
use crate::unit_of_work::{UnitOfWork, UnitOfWorkSession};
use crate::TransactionResult;

/// Order placement on top of a unit of work.
///
/// Each call opens its own session and resolves it before returning, so a
/// service can be shared freely between requests.
#[derive(Debug, Clone)]
pub struct OrderService<U> {
    uow: U,
}

impl<U: UnitOfWork> OrderService<U> {
    pub fn new(uow: U) -> Self {
        Self { uow }
    }

    /// Take `quantity` units of the product out of stock and record the
    /// order, atomically.
    ///
    /// Insufficient stock is reported as
    /// [`crate::TransactionError::PreconditionFailed`] and leaves no trace
    /// in the store.
    #[instrument(skip_all, fields(%user_id, %product_id, quantity))]
    pub async fn place_order(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
        cancel: &CancelSignal,
    ) -> TransactionResult<Order> {
        let order = Order::new(user_id, product_id, quantity);
        let options = self.uow.default_options().with_mode(Mode::Transactional);

        let result = self
            .uow
            .run(options, cancel, move |session| Box::pin(record_order(session, order)))
            .await;

        match &result {
            Ok(order) => info!(order_id = %order.id, "Order placed"),
            Err(err) if err.is_domain() => info!(reason = %err, "Order rejected"),
            Err(err) => warn!(error = %err, "Order placement failed"),
        }
        result
    }

    /// Read an order outside of any transaction.
    pub async fn find_order(
        &self,
        order_id: Uuid,
        cancel: &CancelSignal,
    ) -> TransactionResult<Option<Order>> {
        let options = self.uow.default_options().with_mode(Mode::NonTransactional);
        self.uow
            .run(options, cancel, move |session| {
                Box::pin(async move {
                    session
                        .orders()?
                        .find_by_id(order_id, session.signal())
                        .await
                })
            })
            .await
    }
}

/// Decrement first: the guarded update takes the row lock, so the order is
/// only recorded once the units are reserved.
async fn record_order<S>(session: &S, order: Order) -> TransactionResult<Order>
where
    S: UnitOfWorkSession,
{
    let cancel = session.signal();
    session
        .products()?
        .decrement_stock(order.product_id, order.quantity, cancel)
        .await?;
    session.orders()?.create(&order, cancel).await?;
    Ok(order)
}
