use ctx_request::{Client, ExtOverrides, RequestOptions};
use serde_json::json;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let base_url = std::env::var("CTX_REQUEST_BASE_URL")?;

    let mut client = Client::new()
        .with_options(
            ExtOverrides::new()
                .base_url(base_url)
                .timeout_ms(5_000)
                .repeat_num(1),
        )
        .with_header("Accept", "application/json");

    client.use_request(|ctx| {
        ctx.req.header.insert("X-Client".to_owned(), "basic-demo".to_owned());
        Ok(())
    });
    client.on_complete(|ctx, err| match err {
        Some(err) => eprintln!(
            "{} failed after {} attempts: {err}",
            ctx.ext.url_without_query, ctx.ext.attempts
        ),
        None => eprintln!(
            "{} took {:?}",
            ctx.ext.url_without_query, ctx.ext.request_cost_time
        ),
    });

    let res = client
        .post(RequestOptions::new("/users").json(json!({ "name": "Kit" })))
        .await?;
    println!("{}", res.data);

    Ok(())
}
