use std::{collections::BTreeSet, sync::Arc, time::Duration};

use shopcrawler::{
    error::TransportError,
    events,
    page::{clean, Field, Model},
    storage::MemorySink,
    ConcurrencyPolicy, HttpClient, PageModel, ReqwestClient, Spider, SpiderConfig,
};
use tokio_util::sync::CancellationToken;
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, ResponseTemplate,
};

#[tokio::test]
async fn sends_headers_and_reads_the_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/start"))
        .and(header("user-agent", "test-agent"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<title>Shop</title>")
                .insert_header("x-shop", "1"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = ReqwestClient::new().unwrap();
    let response = client
        .get(
            &format!("{}/start", server.uri()),
            &[("user-agent".to_owned(), "test-agent".to_owned())],
            Duration::from_secs(5),
        )
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body, "<title>Shop</title>");
    assert!(response
        .headers
        .contains(&("x-shop".to_owned(), "1".to_owned())));
}

#[tokio::test]
async fn slow_servers_time_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let client = ReqwestClient::new().unwrap();
    let err = client
        .get(&server.uri(), &[], Duration::from_millis(100))
        .await
        .unwrap_err();
    assert_eq!(err, TransportError::Timeout);
}

#[tokio::test]
async fn crawls_a_mock_shop() {
    let server = MockServer::start().await;
    let page = |body: &str| ResponseTemplate::new(200).set_body_string(format!("<html><body>{body}</body></html>"));
    Mock::given(path("/start"))
        .respond_with(page("<a href='/cat/1'>1</a><a href='/cat/2'>2</a><a href='https://elsewhere.test/'>x</a>"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(path("/cat/1"))
        .respond_with(page(
            "<ul><li class='product'><b>Catan</b></li><li class='product'><b>Azul</b></li></ul>",
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(path("/cat/2"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let start = PageModel::builder("Start")
        .catalogue_links(Field::css("pages", "a::attr(href)").many().clean(clean::absolute_urls))
        .build()
        .unwrap();
    let product = Model::builder("Product")
        .field(Field::css("name", "b::text"))
        .build()
        .unwrap();
    let catalogue = PageModel::builder("Catalogue")
        .items(Field::css("products", "li.product").many().model(product))
        .build()
        .unwrap();
    let config = SpiderConfig::builder("mock-shop", server.uri())
        .start_urls([format!("{}/start", server.uri())])
        .start_model(start)
        .catalogue_model(catalogue)
        .concurrency(ConcurrencyPolicy {
            request_delay: Duration::ZERO,
            retry_delay: Duration::ZERO,
            url_retries: 2,
            ..ConcurrencyPolicy::default()
        })
        .build()
        .unwrap();

    let sink = MemorySink::new();
    let (events, mut dispatcher) = events::channel();
    dispatcher.register(sink.clone());
    let dispatching = tokio::spawn(dispatcher.run());

    let spider = Spider::new(config, Arc::new(ReqwestClient::new().unwrap()), &events);
    let report = spider.run(CancellationToken::new()).await;
    drop(events);
    dispatching.await.unwrap();

    assert_eq!(report.urls_total(), 3);
    assert_eq!(
        report.urls_failed(),
        BTreeSet::from([format!("{}/cat/2", server.uri()).as_str()])
    );
    assert_eq!(report.items_extracted, 2);
    let names: Vec<_> = sink
        .items_of("mock-shop")
        .iter()
        .map(|item| item["name"].clone())
        .collect();
    assert_eq!(names, [serde_json::json!("Catan"), serde_json::json!("Azul")]);
}
