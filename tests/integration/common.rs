//! Shared fixtures for the integration tests

use fundscout::config::{parse_config, Config};
use std::path::Path;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration pointing at a mock server
pub fn create_test_config(base_url: &str, db_path: &Path, cache_dir: Option<&Path>) -> Config {
    let cache = match cache_dir {
        Some(dir) => format!("enabled = true\ndir = {:?}", dir.display().to_string()),
        None => "enabled = false".to_string(),
    };
    let toml = format!(
        r#"
[crawler]
base-url = "{base_url}"
max-retries = 1
retry-base-delay-ms = 1
retry-max-delay-ms = 10
retry-jitter-ms = 0
save-interval = 1

[governor]
max-network = 3
min-request-interval-ms = 0
max-request-interval-ms = 0

[cache]
{cache}

[http]
timeout-secs = 5

[output]
database-path = {db:?}
"#,
        db = db_path.display().to_string(),
    );
    parse_config(&toml).expect("test config should be valid")
}

pub const LISTING: &str = r#"
<html><body>
<div class="pro_field"><ul>
  <li><a class="pro_name ga" href="/item/1001.html"><h3 class="pro_title">Solar desk lamp</h3></a></li>
  <li><a class="pro_name ga" href="/item/1002.html"><h3 class="pro_title">Dice tower</h3></a></li>
  <li><a class="pro_name ga" href="/item/1003.html"><h3 class="pro_title">Lost project</h3></a></li>
  <li><a class="pro_name ga" href="/item/1004.html"><h3 class="pro_title">测试项目 sample</h3></a></li>
</ul></div>
</body></html>"#;

pub const ACTIVE_DETAIL: &str = r##"
<html><body>
<div class="buttons clearfloat"><a href="#">立即购买支持</a></div>
<span backer_money="">¥6,000</span>
<span rate="">60%</span>
<span class="goal-money">目标金额 ¥10,000</span>
<span backer_count="">88</span>
<div class="col2 remain-time"><h3 start_time="2024-01-01 10:00:00" end_time="2024-02-01 10:00:00">剩余</h3></div>
<div class="sponsor-info">
  <a class="sponsor-link" href="/u/detail?uid=42"></a>
  <span class="name">Lamp Works</span>
  <p>项目类别：科技</p>
</div>
</body></html>"##;

pub const PREHEAT_DETAIL: &str = r##"
<html><body>
<div class="buttons clearfloat"><a href="#">看好项目</a></div>
<div class="col2 start-time"><h3>2024-03-01 10:00 开始</h3><h3>2024-04-01 10:00 结束</h3></div>
<span subscribe_count="">31</span>
<div class="sponsor-info">
  <span class="name">Tabletop Co</span>
  <p>项目类别：桌游</p>
</div>
</body></html>"##;

/// Serves the listing and detail pages for the `games` category, page 1
///
/// Project 1002 answers 500 once before succeeding; project 1003 is gone.
pub async fn mount_site(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/games/top_time/all/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LISTING))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/item/1001.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ACTIVE_DETAIL))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/item/1002.html"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/item/1002.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PREHEAT_DETAIL))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/item/1003.html"))
        .respond_with(ResponseTemplate::new(404))
        .mount(server)
        .await;
}
