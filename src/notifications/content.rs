//! Subject and bodies of the job completion mail.

use crate::job_store::{Job, JobStatus};

/// Token standing for the job id inside stored error messages.
pub const JOB_ID_PLACEHOLDER: &str = "#ID#";

/// Substitute the job id into a stored message template.
pub fn render_message(template: &str, job_id: &str) -> String {
    template.replace(JOB_ID_PLACEHOLDER, job_id)
}

pub fn escape_html(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Turns stored markup into plain text, one `<br/>` per line break.
fn markup_to_text(message: &str) -> String {
    let text = message
        .replace("<br/>", "\n")
        .replace("</p><p>", "\n")
        .replace("<p>", "")
        .replace("</p>", "\n");
    unescape_html(&strip_tags(&text)).trim_end().to_string()
}

/// Reverse of [`escape_html`]. `&amp;` goes last so `&amp;lt;` stays `&lt;`.
fn unescape_html(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn strip_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for c in s.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationContent {
    pub subject: String,
    pub text: String,
    pub html: String,
}

pub fn result_url(web_url: &str, job_id: &str) -> String {
    format!("{}/result/{}", web_url, job_id)
}

pub fn subject(job: &Job) -> String {
    match job.status {
        JobStatus::Success | JobStatus::NoMatch => format!("DGenies - Job completed: {}", job.id),
        _ => format!("DGenies - Job failed: {}", job.id),
    }
}

fn error_text(job: &Job) -> String {
    match job.error.as_deref() {
        Some(error) if !error.is_empty() => markup_to_text(&render_message(error, &job.id)),
        _ => format!(
            "Your job {} has failed. You can try again. \
             If the problem persists, please contact the support.",
            job.id
        ),
    }
}

fn sequence_names(job: &Job) -> (String, Option<String>) {
    let target = job
        .target
        .as_ref()
        .map(|t| t.name.clone())
        .unwrap_or_default();
    let query = job.query.as_ref().map(|q| q.name.clone());
    (target, query)
}

pub fn text_body(job: &Job, web_url: &str) -> String {
    let mut message = String::from("D-Genies\n\n");
    match job.status {
        JobStatus::Success => {
            message.push_str(&format!(
                "Your job {0} was completed successfully!\n\n\
                 Your job {0} is finished. You can see the results by clicking on the link below:\n\
                 {1}\n\n",
                job.id,
                result_url(web_url, &job.id)
            ));
        }
        JobStatus::NoMatch => {
            message.push_str(&format!(
                "Your job {} was completed, but no match was found between your sequences.\n\n",
                job.id
            ));
        }
        _ => {
            message.push_str(&format!("Your job {} has failed!\n\n", job.id));
            message.push_str(&error_text(job));
            message.push_str("\n\n");
        }
    }

    let (target, query) = sequence_names(job);
    message.push_str("Sequences compared in this analysis:\n");
    match query {
        Some(query) => message.push_str(&format!("Target: {}\nQuery: {}\n\n", target, query)),
        None => message.push_str(&format!("Target: {}\n\n", target)),
    }
    message.push_str("See you soon on D-Genies,\nThe team");
    message
}

pub fn html_body(job: &Job, web_url: &str) -> String {
    let job_id = escape_html(&job.id);
    let headline = match job.status {
        JobStatus::Success => format!(
            "<p>Your job <b>{0}</b> was completed successfully!</p>\
             <p><a href=\"{1}\">See the results</a></p>",
            job_id,
            escape_html(&result_url(web_url, &job.id))
        ),
        JobStatus::NoMatch => format!(
            "<p>Your job <b>{}</b> was completed, but no match was found between your sequences.</p>",
            job_id
        ),
        // Stored error messages are trusted markup
        _ => format!(
            "<p>Your job <b>{}</b> has failed!</p><div>{}</div>",
            job_id,
            job.error
                .as_deref()
                .map(|e| render_message(e, &job.id))
                .unwrap_or_default()
        ),
    };

    let (target, query) = sequence_names(job);
    let mut sequences = format!("<li>Target: {}</li>", escape_html(&target));
    if let Some(query) = query {
        sequences.push_str(&format!("<li>Query: {}</li>", escape_html(&query)));
    }

    format!(
        "<html><body><h1>D-Genies</h1>{}\
         <p>Sequences compared in this analysis:</p><ul>{}</ul>\
         <p>See you soon on D-Genies,<br/>The team</p></body></html>",
        headline, sequences
    )
}

pub fn compose(job: &Job, web_url: &str) -> NotificationContent {
    NotificationContent {
        subject: subject(job),
        text: text_body(job, web_url),
        html: html_body(job, web_url),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_store::SequenceReference;

    fn finished_job(status: JobStatus) -> Job {
        let mut job = Job::new("abc123", "local");
        job.status = status;
        job.target = Some(SequenceReference::local("/data/abc123/target_chr1.fa"));
        job.target.as_mut().unwrap().name = "chr1".to_string();
        job
    }

    #[test]
    fn test_render_message_substitutes_id() {
        assert_eq!(render_message("Job #ID# failed", "abc123"), "Job abc123 failed");
        assert_eq!(render_message("no placeholder", "abc123"), "no placeholder");
    }

    #[test]
    fn test_subjects() {
        assert_eq!(
            subject(&finished_job(JobStatus::Success)),
            "DGenies - Job completed: abc123"
        );
        assert_eq!(
            subject(&finished_job(JobStatus::NoMatch)),
            "DGenies - Job completed: abc123"
        );
        assert_eq!(
            subject(&finished_job(JobStatus::Error)),
            "DGenies - Job failed: abc123"
        );
    }

    #[test]
    fn test_success_text_links_results() {
        let text = text_body(&finished_job(JobStatus::Success), "https://dgenies.example.org");
        assert!(text.starts_with("D-Genies\n\n"));
        assert!(text.contains("https://dgenies.example.org/result/abc123"));
        assert!(text.contains("Target: chr1\n\n"));
        assert!(!text.contains("Query:"));
        assert!(text.ends_with("The team"));
    }

    #[test]
    fn test_failure_text_normalizes_markup() {
        let mut job = finished_job(JobStatus::Error);
        job.error = Some("Your job #ID# has failed.<br/>Contact us.".to_string());
        job.query = Some(SequenceReference::local("/data/abc123/query_chr2.fa"));

        let text = text_body(&job, "http://localhost:5000");
        assert!(text.contains("Your job abc123 has failed!\n\n"));
        assert!(text.contains("Your job abc123 has failed.\nContact us.\n\n"));
        assert!(text.contains("Target: chr1\nQuery: query_chr2\n\n"));
    }

    #[test]
    fn test_failure_text_strips_paragraphs() {
        let mut job = finished_job(JobStatus::Error);
        job.error = Some(
            "<p>Url <b>ftp:/x</b> is not a valid URL!</p><p>If this is unattended, please contact the support.</p>"
                .to_string(),
        );
        let text = text_body(&job, "http://localhost:5000");
        assert!(text.contains(
            "Url ftp:/x is not a valid URL!\nIf this is unattended, please contact the support.\n\n"
        ));
    }

    #[test]
    fn test_failure_text_unescapes_entities() {
        let url = "http://example.org/get?id=7&format=fa";
        let mut job = finished_job(JobStatus::Error);
        job.error = Some(format!(
            "<p>Url <b>{}</b> is not a valid URL!</p>",
            escape_html(url)
        ));

        let text = text_body(&job, "http://localhost:5000");
        assert!(text.contains("Url http://example.org/get?id=7&format=fa is not a valid URL!"));
        assert!(!text.contains("&amp;"));
        assert_eq!(unescape_html("&amp;lt;b&amp;gt;"), "&lt;b&gt;");
    }

    #[test]
    fn test_html_escapes_names() {
        let mut job = finished_job(JobStatus::Success);
        job.target.as_mut().unwrap().name = "<script>".to_string();
        let html = html_body(&job, "http://localhost:5000");
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>"));
    }
}
