//! HTML extractor for the crowdfunding site markup
//!
//! Selectors follow the site's listing grid (`div.pro_field li`) and project
//! detail layout. Everything is best-effort: a missing funding figure stays zero
//! and a missing time stays `None`. Only a page that has none of the detail page
//! landmarks is rejected.

use crate::extractor::{ExtractError, Extractor};
use crate::model::{Author, CandidateRef, Content, Funding, ProjectFields, ProjectStatus};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

const LISTING_ITEM: &str = "div.pro_field li";
const LISTING_LINK: &str = "a.pro_name.ga";
const LISTING_TITLE: &str = "h3.pro_title";
const STATUS_BUTTON: &str = "div.buttons.clearfloat a";
const RAISED: &str = "span[backer_money]";
const PERCENT: &str = "span[rate]";
const TARGET: &str = "span.goal-money";
const BACKERS: &str = "span[backer_count]";
const SPONSOR: &str = "div.sponsor-info";
const PREHEAT_TIMES: &str = "div.col2.start-time h3";
const FUNDING_TIMES: &str = "div.col2.remain-time h3";
const REWARDS: &str = "div.payback-lists .back-list";
const UPDATES: &str = "li[class*=\"gengxin\"] span";
const COMMENTS: &str = "li[class*=\"comment\"] span";
const LIKES: &str = "li[class*=\"like\"] span";
const CONTENT_IMAGES: &str = "div.project-content img";
const CONTENT_VIDEOS: &str = "div.project-content video";

const CATEGORY_PREFIXES: [&str; 2] = ["项目类别：", "项目类别:"];

/// Default [`Extractor`] built on `scraper`
#[derive(Debug, Clone)]
pub struct HtmlExtractor {
    base_url: Url,
    item_id: Regex,
    number: Regex,
    trailing_digits: Regex,
}

impl HtmlExtractor {
    /// Creates an extractor that resolves relative links against `base_url`
    pub fn new(base_url: &str) -> Result<Self, ExtractError> {
        let base_url = Url::parse(base_url).map_err(|_| ExtractError::Malformed {
            field: "base-url".to_string(),
            value: base_url.to_string(),
        })?;

        Ok(Self {
            base_url,
            item_id: compile(r"/item/(\d+)\.html")?,
            number: compile(r"\d[\d,]*(?:\.\d+)?")?,
            trailing_digits: compile(r"(\d+)\D*$")?,
        })
    }

    fn resolve(&self, href: &str) -> Option<String> {
        let href = href.trim();
        if href.is_empty() || href.starts_with("javascript:") || href.starts_with("data:") {
            return None;
        }
        self.base_url.join(href).ok().map(|u| u.to_string())
    }

    fn external_id(&self, url: &str) -> Option<String> {
        self.item_id
            .captures(url)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }

    /// First number in `text`, thousands separators removed
    fn parse_number(&self, text: &str) -> Option<f64> {
        let m = self.number.find(text)?;
        m.as_str().replace(',', "").parse().ok()
    }

    fn number_at(&self, document: &Html, css: &str) -> Result<f64, ExtractError> {
        Ok(first_text(document, css)?
            .and_then(|t| self.parse_number(&t))
            .unwrap_or(0.0))
    }

    fn count_at(&self, document: &Html, css: &str) -> Result<u64, ExtractError> {
        Ok(self.number_at(document, css)? as u64)
    }

    fn parse_funding(&self, document: &Html) -> Result<Funding, ExtractError> {
        let raised = self.number_at(document, RAISED)?;
        let percent = self.number_at(document, PERCENT)?;
        let mut target = self.number_at(document, TARGET)?;
        let backer_count = self.count_at(document, BACKERS)?;

        let mut target_derived = false;
        if target <= 0.0 && raised > 0.0 && percent > 0.0 {
            target = (raised / (percent / 100.0) * 100.0).round() / 100.0;
            target_derived = true;
        }

        Ok(Funding {
            raised,
            target,
            percent,
            backer_count,
            target_derived,
        })
    }

    fn parse_author(&self, document: &Html) -> Result<Author, ExtractError> {
        let mut author = Author::default();
        let sponsor_sel = selector(SPONSOR)?;
        let Some(sponsor) = document.select(&sponsor_sel).next() else {
            return Ok(author);
        };

        let nickname_sel = selector("span[data-nickname]")?;
        let name_sel = selector("span.name")?;
        author.name = sponsor
            .select(&nickname_sel)
            .next()
            .and_then(|e| e.value().attr("data-nickname").map(str::to_string))
            .filter(|s| !s.trim().is_empty())
            .or_else(|| sponsor.select(&name_sel).next().map(element_text))
            .unwrap_or_default()
            .trim()
            .to_string();

        let link_sel = selector("a.sponsor-link")?;
        if let Some(href) = sponsor
            .select(&link_sel)
            .next()
            .and_then(|e| e.value().attr("href"))
        {
            author.homepage = self.resolve(href).unwrap_or_default();
            author.uid = self
                .trailing_digits
                .captures(&author.homepage)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
        }

        let avatar_sel = selector("img.sponsor-image")?;
        author.avatar = sponsor
            .select(&avatar_sel)
            .next()
            .and_then(image_source)
            .and_then(|src| self.resolve(src))
            .unwrap_or_default();

        Ok(author)
    }

    fn parse_category(&self, document: &Html) -> Result<String, ExtractError> {
        let sponsor_sel = selector(SPONSOR)?;
        let text_sel = selector("p, span")?;
        for sponsor in document.select(&sponsor_sel) {
            for element in sponsor.select(&text_sel) {
                let text = element_text(element);
                for prefix in CATEGORY_PREFIXES {
                    if let Some(idx) = text.find(prefix) {
                        let rest = text[idx + prefix.len()..].trim();
                        let category = rest.split_whitespace().next().unwrap_or("");
                        if !category.is_empty() {
                            return Ok(category.to_string());
                        }
                    }
                }
            }
        }
        Ok(String::new())
    }

    fn parse_times(
        &self,
        document: &Html,
        status: ProjectStatus,
    ) -> Result<(Option<String>, Option<String>), ExtractError> {
        match status {
            ProjectStatus::Idea | ProjectStatus::Unknown => Ok((None, None)),
            ProjectStatus::Preheat => {
                let sel = selector(PREHEAT_TIMES)?;
                let texts: Vec<String> = document.select(&sel).map(element_text).collect();
                let start = texts
                    .first()
                    .filter(|t| t.contains("开始"))
                    .map(|t| t.replace("开始", "").trim().to_string());
                let end = texts
                    .get(1)
                    .filter(|t| t.contains("结束"))
                    .map(|t| t.replace("结束", "").trim().to_string());
                Ok((start, end))
            }
            _ => {
                let sel = selector(FUNDING_TIMES)?;
                let mut start = None;
                let mut end = None;
                for h3 in document.select(&sel) {
                    if let Some(v) = h3.value().attr("start_time").filter(|v| !v.is_empty()) {
                        start = Some(v.trim().to_string());
                    }
                    if let Some(v) = h3.value().attr("end_time").filter(|v| !v.is_empty()) {
                        end = Some(v.trim().to_string());
                    }
                }
                Ok((start, end))
            }
        }
    }

    fn parse_content(&self, document: &Html) -> Result<Content, ExtractError> {
        let rewards = selector(REWARDS)?;
        let images = selector(CONTENT_IMAGES)?;
        let videos = selector(CONTENT_VIDEOS)?;
        let sources = selector("source")?;

        let mut content = Content {
            reward_count: document.select(&rewards).count() as u64,
            update_count: self.count_at(document, UPDATES)?,
            comment_count: self.count_at(document, COMMENTS)?,
            like_count: self.count_at(document, LIKES)?,
            ..Content::default()
        };

        content.images = document
            .select(&images)
            .filter_map(image_source)
            .filter_map(|src| self.resolve(src))
            .collect();

        for video in document.select(&videos) {
            let src = video.value().attr("src").or_else(|| {
                video
                    .select(&sources)
                    .next()
                    .and_then(|s| s.value().attr("src"))
            });
            if let Some(url) = src.and_then(|s| self.resolve(s)) {
                content.videos.push(url);
            }
        }

        Ok(content)
    }

    fn has_detail_landmarks(&self, document: &Html) -> Result<bool, ExtractError> {
        for css in [STATUS_BUTTON, SPONSOR, RAISED, PREHEAT_TIMES, FUNDING_TIMES] {
            if document.select(&selector(css)?).next().is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl Extractor for HtmlExtractor {
    fn parse_listing(&self, html: &str) -> Result<Vec<CandidateRef>, ExtractError> {
        let document = Html::parse_document(html);
        let item_sel = selector(LISTING_ITEM)?;
        let link_sel = selector(LISTING_LINK)?;
        let title_sel = selector(LISTING_TITLE)?;
        let img_sel = selector("img")?;

        let mut candidates = Vec::new();
        for item in document.select(&item_sel) {
            let Some(link) = item.select(&link_sel).next() else {
                continue;
            };
            let Some(url) = link.value().attr("href").and_then(|h| self.resolve(h)) else {
                continue;
            };
            let Some(external_id) = self.external_id(&url) else {
                tracing::debug!(url = %url, "Listing link without project id");
                continue;
            };

            let title = item
                .select(&title_sel)
                .next()
                .map(element_text)
                .or_else(|| link.value().attr("title").map(str::to_string))
                .unwrap_or_default()
                .trim()
                .to_string();

            let thumbnail = item
                .select(&img_sel)
                .next()
                .and_then(image_source)
                .and_then(|src| self.resolve(src))
                .unwrap_or_default();

            candidates.push(CandidateRef {
                url,
                external_id,
                title,
                thumbnail,
            });
        }

        Ok(candidates)
    }

    fn detect_status(&self, html: &str) -> ProjectStatus {
        let document = Html::parse_document(html);
        let Ok(sel) = selector(STATUS_BUTTON) else {
            return ProjectStatus::Unknown;
        };
        document
            .select(&sel)
            .next()
            .map(|button| status_from_button(element_text(button).trim()))
            .unwrap_or(ProjectStatus::Unknown)
    }

    fn parse_detail(
        &self,
        html: &str,
        candidate: &CandidateRef,
        status: ProjectStatus,
    ) -> Result<ProjectFields, ExtractError> {
        if candidate.external_id.is_empty() {
            return Err(ExtractError::Missing("external id".to_string()));
        }

        let document = Html::parse_document(html);
        if !self.has_detail_landmarks(&document)? {
            return Err(ExtractError::Missing("project detail markup".to_string()));
        }

        let title = if candidate.title.is_empty() {
            first_text(&document, "title")?.unwrap_or_default()
        } else {
            candidate.title.clone()
        };

        let (start_time, end_time) = self.parse_times(&document, status)?;

        let mut fields = ProjectFields {
            external_id: candidate.external_id.clone(),
            url: candidate.url.clone(),
            title: title.trim().to_string(),
            thumbnail: candidate.thumbnail.clone(),
            category: self.parse_category(&document)?,
            status,
            start_time,
            end_time,
            funding: self.parse_funding(&document)?,
            author: self.parse_author(&document)?,
            content: self.parse_content(&document)?,
            ..ProjectFields::default()
        };

        if let Some(button) = first_text(&document, STATUS_BUTTON)? {
            fields.extensions.insert("status_text", button.trim());
        }
        if status == ProjectStatus::Preheat {
            let subscribers = self.count_at(&document, "span[subscribe_count]")?;
            if subscribers > 0 {
                fields
                    .extensions
                    .insert("subscriber_count", subscribers.to_string());
            }
        }

        Ok(fields)
    }
}

/// Maps the detail page's call-to-action text to a project stage
pub fn status_from_button(text: &str) -> ProjectStatus {
    match text {
        "看好项目" => ProjectStatus::Preheat,
        "看好" => ProjectStatus::Idea,
        "立即购买支持" => ProjectStatus::Active,
        "众筹成功" | "项目终止" => ProjectStatus::Succeeded,
        "众筹结束" => ProjectStatus::Failed,
        "众筹取消" => ProjectStatus::Cancelled,
        _ => ProjectStatus::Unknown,
    }
}

fn compile(pattern: &str) -> Result<Regex, ExtractError> {
    Regex::new(pattern).map_err(|_| ExtractError::Selector(pattern.to_string()))
}

fn selector(css: &str) -> Result<Selector, ExtractError> {
    Selector::parse(css).map_err(|_| ExtractError::Selector(css.to_string()))
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn first_text(document: &Html, css: &str) -> Result<Option<String>, ExtractError> {
    let sel = selector(css)?;
    Ok(document
        .select(&sel)
        .next()
        .map(element_text)
        .filter(|s| !s.is_empty()))
}

fn image_source(element: ElementRef<'_>) -> Option<&str> {
    element
        .value()
        .attr("data-src")
        .or_else(|| element.value().attr("src"))
        .filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://zhongchou.modian.com";

    fn extractor() -> HtmlExtractor {
        HtmlExtractor::new(BASE).unwrap()
    }

    fn candidate() -> CandidateRef {
        CandidateRef {
            url: format!("{}/item/1001.html", BASE),
            external_id: "1001".to_string(),
            title: "Pixel art book".to_string(),
            thumbnail: String::new(),
        }
    }

    const LISTING: &str = r#"
<html><body>
<div class="pro_field"><ul>
  <li>
    <a class="pro_name ga" href="/item/1001.html"><h3 class="pro_title">Pixel art book</h3></a>
    <img src="//p.example.com/1001.jpg">
  </li>
  <li>
    <a class="pro_name ga" href="https://zhongchou.modian.com/item/1002.html" title="Card game"></a>
  </li>
  <li><a class="pro_name ga" href="/about.html"><h3 class="pro_title">Not a project</h3></a></li>
  <li><span>no link here</span></li>
</ul></div>
</body></html>"#;

    const ACTIVE_DETAIL: &str = r##"
<html><head><title>Detail</title></head><body>
<div class="buttons clearfloat"><a href="#">立即购买支持</a></div>
<div class="center">
  <span backer_money="">¥6,000.50</span>
  <span rate="">60%</span>
  <div class="col1 project-goal"><span class="goal-money">目标金额 ¥10,000</span></div>
  <span backer_count="">123</span>
  <div class="col2 remain-time"><h3 start_time="2024-01-01 10:00:00" end_time="2024-02-01 10:00:00">剩余</h3></div>
</div>
<div class="sponsor-info">
  <a class="sponsor-link" href="/u/detail?uid=556677"><img class="sponsor-image" src="/avatar/556677.png"></a>
  <span class="name">Studio Nine</span>
  <p class="tags">项目类别：桌游</p>
</div>
<div class="main-right"><div class="payback-lists margin36">
  <div class="back-list">A</div><div class="back-list">B</div><div class="back-list">C</div>
</div></div>
<ul><li class="pro-gengxin"><span>更新 4</span></li><li class="pro-comment"><span>评论 17</span></li></ul>
<div class="main-left"><div class="project-content">
  <img data-src="/img/a.jpg"><img src="/img/b.jpg">
  <video><source src="/video/v.mp4"></video>
</div></div>
</body></html>"##;

    #[test]
    fn test_parse_listing() {
        let candidates = extractor().parse_listing(LISTING).unwrap();
        assert_eq!(candidates.len(), 2);

        assert_eq!(candidates[0].external_id, "1001");
        assert_eq!(candidates[0].url, format!("{}/item/1001.html", BASE));
        assert_eq!(candidates[0].title, "Pixel art book");
        assert_eq!(candidates[0].thumbnail, "https://p.example.com/1001.jpg");

        assert_eq!(candidates[1].external_id, "1002");
        assert_eq!(candidates[1].title, "Card game");
        assert!(candidates[1].thumbnail.is_empty());
    }

    #[test]
    fn test_parse_listing_without_grid_is_empty() {
        let candidates = extractor()
            .parse_listing("<html><body><p>maintenance</p></body></html>")
            .unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_status_from_button() {
        assert_eq!(status_from_button("看好"), ProjectStatus::Idea);
        assert_eq!(status_from_button("看好项目"), ProjectStatus::Preheat);
        assert_eq!(status_from_button("立即购买支持"), ProjectStatus::Active);
        assert_eq!(status_from_button("众筹成功"), ProjectStatus::Succeeded);
        assert_eq!(status_from_button("项目终止"), ProjectStatus::Succeeded);
        assert_eq!(status_from_button("众筹结束"), ProjectStatus::Failed);
        assert_eq!(status_from_button("众筹取消"), ProjectStatus::Cancelled);
        assert_eq!(status_from_button("something else"), ProjectStatus::Unknown);
    }

    #[test]
    fn test_detect_status() {
        let ex = extractor();
        assert_eq!(ex.detect_status(ACTIVE_DETAIL), ProjectStatus::Active);
        assert_eq!(ex.detect_status("<html></html>"), ProjectStatus::Unknown);
    }

    #[test]
    fn test_parse_active_detail() {
        let ex = extractor();
        let fields = ex
            .parse_detail(ACTIVE_DETAIL, &candidate(), ProjectStatus::Active)
            .unwrap();

        assert_eq!(fields.external_id, "1001");
        assert_eq!(fields.title, "Pixel art book");
        assert_eq!(fields.category, "桌游");
        assert_eq!(fields.status, ProjectStatus::Active);
        assert_eq!(fields.start_time.as_deref(), Some("2024-01-01 10:00:00"));
        assert_eq!(fields.end_time.as_deref(), Some("2024-02-01 10:00:00"));

        assert_eq!(fields.funding.raised, 6000.5);
        assert_eq!(fields.funding.percent, 60.0);
        assert_eq!(fields.funding.target, 10000.0);
        assert_eq!(fields.funding.backer_count, 123);
        assert!(!fields.funding.target_derived);

        assert_eq!(fields.author.name, "Studio Nine");
        assert_eq!(fields.author.uid, "556677");
        assert_eq!(fields.author.avatar, format!("{}/avatar/556677.png", BASE));

        assert_eq!(fields.content.reward_count, 3);
        assert_eq!(fields.content.update_count, 4);
        assert_eq!(fields.content.comment_count, 17);
        assert_eq!(fields.content.images.len(), 2);
        assert_eq!(fields.content.videos, vec![format!("{}/video/v.mp4", BASE)]);
        assert_eq!(fields.extensions.get("status_text"), Some("立即购买支持"));
    }

    #[test]
    fn test_missing_target_is_derived() {
        let html = r#"
<div class="buttons clearfloat"><a>众筹成功</a></div>
<span backer_money="">500</span><span rate="">250</span>"#;
        let fields = extractor()
            .parse_detail(html, &candidate(), ProjectStatus::Succeeded)
            .unwrap();

        assert_eq!(fields.funding.target, 200.0);
        assert!(fields.funding.target_derived);
    }

    #[test]
    fn test_preheat_times_and_nickname() {
        let html = r#"
<div class="buttons clearfloat"><a>看好项目</a></div>
<div class="col2 start-time"><h3>2024-03-01 12:00 开始</h3><h3>2024-04-01 12:00 结束</h3></div>
<div class="sponsor-info"><span data-nickname="maker">ignored</span><span class="name">fallback</span></div>"#;
        let fields = extractor()
            .parse_detail(html, &candidate(), ProjectStatus::Preheat)
            .unwrap();

        assert_eq!(fields.start_time.as_deref(), Some("2024-03-01 12:00"));
        assert_eq!(fields.end_time.as_deref(), Some("2024-04-01 12:00"));
        assert_eq!(fields.author.name, "maker");
        assert_eq!(fields.funding.target, 0.0);
    }

    #[test]
    fn test_idea_has_no_times() {
        let fields = extractor()
            .parse_detail(ACTIVE_DETAIL, &candidate(), ProjectStatus::Idea)
            .unwrap();
        assert!(fields.start_time.is_none());
        assert!(fields.end_time.is_none());
    }

    #[test]
    fn test_non_detail_page_is_rejected() {
        let err = extractor()
            .parse_detail("<html><body>404</body></html>", &candidate(), ProjectStatus::Unknown)
            .unwrap_err();
        assert!(matches!(err, ExtractError::Missing(_)));
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(HtmlExtractor::new("not a url").is_err());
    }
}
