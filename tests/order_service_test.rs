mod common;

use pg_unit_of_work::{
    CancelSignal, Mode, OrderService, PostgresUnitOfWork, Product, SessionOptions,
    TransactionError, UnitOfWork, UnitOfWorkSession, User,
};
use std::time::Duration;

use common::{cleanup_database, setup_database};

async fn seed(uow: &PostgresUnitOfWork, stock: i32) -> (User, Product) {
    let cancel = CancelSignal::new();
    let session = uow.begin(Mode::Transactional, &cancel).await.unwrap();
    let user = User::new("shopper".to_string(), "shopper@example.com".to_string());
    let product = Product::new("Espresso machine".to_string(), stock);
    session.users().unwrap().create(&user, &cancel).await.unwrap();
    session.products().unwrap().create(&product, &cancel).await.unwrap();
    session.commit().await.unwrap();
    (user, product)
}

async fn current_stock(uow: &PostgresUnitOfWork, product: &Product) -> i32 {
    let cancel = CancelSignal::new();
    let session = uow.begin(Mode::NonTransactional, &cancel).await.unwrap();
    let stock = session
        .products()
        .unwrap()
        .find_by_id(product.id, &cancel)
        .await
        .unwrap()
        .expect("Product not found")
        .stock;
    session.commit().await.unwrap();
    stock
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial_test::serial]
async fn test_place_order_decrements_stock_and_records_order() {
    let pool = setup_database().await;
    let uow = PostgresUnitOfWork::new(pool.clone());
    let (user, product) = seed(&uow, 5).await;
    let service = OrderService::new(uow.clone());
    let cancel = CancelSignal::with_timeout(Duration::from_secs(5));

    let order = service
        .place_order(user.id, product.id, 2, &cancel)
        .await
        .expect("Order should be placed");
    assert_eq!(order.quantity, 2);
    assert_eq!(order.product_id, product.id);

    assert_eq!(current_stock(&uow, &product).await, 3);
    let stored = service
        .find_order(order.id, &cancel)
        .await
        .unwrap()
        .expect("Order should be stored");
    assert_eq!(stored, order);

    cleanup_database(pool).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial_test::serial]
async fn test_place_order_rejects_insufficient_stock() {
    let pool = setup_database().await;
    let uow = PostgresUnitOfWork::new(pool.clone());
    let (user, product) = seed(&uow, 1).await;
    let service = OrderService::new(uow.clone());
    let cancel = CancelSignal::new();

    let err = service
        .place_order(user.id, product.id, 2, &cancel)
        .await
        .expect_err("Stock of 1 cannot cover 2 units");
    assert!(matches!(err, TransactionError::PreconditionFailed(_)));

    assert_eq!(current_stock(&uow, &product).await, 1);
    let session = uow.begin(Mode::NonTransactional, &cancel).await.unwrap();
    assert_eq!(
        session
            .orders()
            .unwrap()
            .count_for_product(product.id, &cancel)
            .await
            .unwrap(),
        0
    );
    session.commit().await.unwrap();

    cleanup_database(pool).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial_test::serial]
async fn test_place_order_for_unknown_user_rolls_back_decrement() {
    let pool = setup_database().await;
    let uow = PostgresUnitOfWork::new(pool.clone());
    let (_user, product) = seed(&uow, 4).await;
    let service = OrderService::new(uow.clone());

    // The order insert violates the foreign key after the decrement succeeded
    let err = service
        .place_order(uuid::Uuid::new_v4(), product.id, 1, &CancelSignal::new())
        .await
        .expect_err("Unknown user must fail the order");
    assert!(matches!(err, TransactionError::StatementFailed(_)));
    assert!(!err.is_domain());

    assert_eq!(current_stock(&uow, &product).await, 4);

    cleanup_database(pool).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial_test::serial]
async fn test_place_order_with_fired_signal_never_begins() {
    let pool = setup_database().await;
    let uow = PostgresUnitOfWork::new(pool.clone())
        .with_default_options(SessionOptions::non_transactional());
    let (user, product) = seed(&uow, 4).await;
    let service = OrderService::new(uow.clone());

    let cancel = CancelSignal::new();
    cancel.cancel();
    let err = service
        .place_order(user.id, product.id, 1, &cancel)
        .await
        .expect_err("A fired signal must stop the order");
    assert!(matches!(err, TransactionError::BeginFailed { .. }));

    assert_eq!(current_stock(&uow, &product).await, 4);

    cleanup_database(pool).await;
}
