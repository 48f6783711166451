//! Message rendering.
//!
//! Turns an enquiry plus its resolved provider config into a provider-ready
//! message. Rendering is pure: no I/O, no network.

use std::collections::BTreeMap;
use std::fmt::Write;

use crate::models::{Channel, EnquiryRecord, MessageContent, ProviderConfig, RenderedMessage};

pub const DEFAULT_TEMPLATE_NAME: &str = "admission_confirmation";
pub const DEFAULT_TEMPLATE_LANGUAGE: &str = "en";
pub const DEFAULT_DATE_FORMAT: &str = "%d-%m-%Y";

pub const DEFAULT_WHATSAPP_TEXT: &str = "Dear {parent_name}, thank you for your admission enquiry at {institution_name}. Your enquiry number is {enquiry_number} for {grade}. Our admissions team will contact you shortly.";

pub const DEFAULT_SMS_TEXT: &str = "Dear {parent_name}, your admission enquiry {enquiry_number} at {institution_name} has been received. We will contact you shortly.";

pub const DEFAULT_EMAIL_SUBJECT: &str = "Admission enquiry {enquiry_number} received";

pub const DEFAULT_EMAIL_TEXT: &str = r#"Dear {parent_name},

Thank you for your interest in {institution_name}. We have received your admission enquiry.

Enquiry number: {enquiry_number}
Student: {student_name}
Grade: {grade}
Board: {board}
Submitted on: {submission_date}

Our admissions team will contact you shortly.

--
{institution_name} Admissions"#;

pub const DEFAULT_EMAIL_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
</head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; margin: 0; padding: 20px; background-color: #f3f4f6;">
    <div style="max-width: 600px; margin: 0 auto; background-color: #ffffff; border-radius: 8px; overflow: hidden; box-shadow: 0 1px 3px rgba(0,0,0,0.1);">
        <div style="background-color: #1d4ed8; padding: 16px 24px;">
            <h1 style="color: #ffffff; margin: 0; font-size: 18px; font-weight: 600;">
                Enquiry {enquiry_number} received
            </h1>
        </div>
        <div style="padding: 24px;">
            <p style="margin: 0 0 16px 0; font-size: 14px; color: #374151; line-height: 1.5;">
                Dear {parent_name}, thank you for your interest in {institution_name}.
                We have received your admission enquiry and our team will contact you shortly.
            </p>
            <table style="width: 100%; border-collapse: collapse; font-size: 13px;">
                <tr>
                    <td style="padding: 8px 0; color: #6b7280; border-top: 1px solid #e5e7eb;">Student</td>
                    <td style="padding: 8px 0; color: #111827; border-top: 1px solid #e5e7eb; text-align: right;">{student_name}</td>
                </tr>
                <tr>
                    <td style="padding: 8px 0; color: #6b7280; border-top: 1px solid #e5e7eb;">Grade</td>
                    <td style="padding: 8px 0; color: #111827; border-top: 1px solid #e5e7eb; text-align: right;">{grade}</td>
                </tr>
                <tr>
                    <td style="padding: 8px 0; color: #6b7280; border-top: 1px solid #e5e7eb;">Board</td>
                    <td style="padding: 8px 0; color: #111827; border-top: 1px solid #e5e7eb; text-align: right;">{board}</td>
                </tr>
                <tr>
                    <td style="padding: 8px 0; color: #6b7280; border-top: 1px solid #e5e7eb;">Submitted on</td>
                    <td style="padding: 8px 0; color: #111827; border-top: 1px solid #e5e7eb; text-align: right;">{submission_date}</td>
                </tr>
            </table>
        </div>
        <div style="padding: 16px 24px; background-color: #f9fafb; border-top: 1px solid #e5e7eb;">
            <p style="margin: 0; font-size: 12px; color: #6b7280;">
                {institution_name} Admissions
            </p>
        </div>
    </div>
</body>
</html>"#;

/// Stateless renderer
pub struct MessageRenderer;

impl MessageRenderer {
    /// Renders the message for one channel
    pub fn render(
        channel: Channel,
        config: &ProviderConfig,
        enquiry: &EnquiryRecord,
    ) -> RenderedMessage {
        let context = Self::context(config, enquiry);
        let destination = enquiry.destination(channel);

        let content = match channel {
            Channel::Email => Self::render_email(config, &context),
            Channel::Whatsapp | Channel::Sms if config.template_mode() => {
                Self::render_template(config, &context)
            }
            Channel::Whatsapp => MessageContent::Text {
                body: interpolate(
                    config.setting_or("text_template", DEFAULT_WHATSAPP_TEXT),
                    &context,
                    str::to_string,
                ),
            },
            Channel::Sms => MessageContent::Text {
                body: interpolate(
                    config.setting_or("text_template", DEFAULT_SMS_TEXT),
                    &context,
                    str::to_string,
                ),
            },
        };

        RenderedMessage {
            channel,
            destination,
            content,
        }
    }

    /// Placeholder values: every enquiry field plus derived keys
    pub fn context(config: &ProviderConfig, enquiry: &EnquiryRecord) -> BTreeMap<String, String> {
        let mut context: BTreeMap<String, String> = enquiry
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.trim().to_string()))
            .collect();

        let institution = config
            .setting("institution_name")
            .or_else(|| enquiry.field("institution_name"))
            .unwrap_or_default()
            .to_string();

        context.insert("institution_name".to_string(), institution);
        context.insert(
            "parent_name".to_string(),
            enquiry.parent_name().unwrap_or_default().to_string(),
        );
        context.insert(
            "enquiry_number".to_string(),
            enquiry.enquiry_number.clone(),
        );
        context.insert("enquiry_id".to_string(), enquiry.id.to_string());

        let date_format = config.setting_or("date_format", DEFAULT_DATE_FORMAT);
        let mut submission_date = String::new();
        if write!(submission_date, "{}", enquiry.created_at.format(date_format)).is_err() {
            // Invalid user-supplied format string
            submission_date = enquiry.created_at.format(DEFAULT_DATE_FORMAT).to_string();
        }
        context.insert("submission_date".to_string(), submission_date);

        context
    }

    /// Ordered template parameters: parent name, enquiry number, institution
    /// name, grade, submission date
    pub fn template_parameters(context: &BTreeMap<String, String>) -> Vec<String> {
        ["parent_name", "enquiry_number", "institution_name", "grade", "submission_date"]
            .iter()
            .map(|key| context.get(*key).cloned().unwrap_or_default())
            .collect()
    }

    fn render_template(config: &ProviderConfig, context: &BTreeMap<String, String>) -> MessageContent {
        let name = config
            .setting("template_name")
            .or_else(|| config.setting("template_id"))
            .unwrap_or(DEFAULT_TEMPLATE_NAME)
            .to_string();

        MessageContent::Template {
            name,
            language: config
                .setting_or("template_language", DEFAULT_TEMPLATE_LANGUAGE)
                .to_string(),
            parameters: Self::template_parameters(context),
        }
    }

    fn render_email(config: &ProviderConfig, context: &BTreeMap<String, String>) -> MessageContent {
        MessageContent::Email {
            subject: interpolate(
                config.setting_or("subject_template", DEFAULT_EMAIL_SUBJECT),
                context,
                str::to_string,
            ),
            html: interpolate(
                config.setting_or("body_template", DEFAULT_EMAIL_HTML),
                context,
                html_escape,
            ),
            text: interpolate(
                config.setting_or("text_template", DEFAULT_EMAIL_TEXT),
                context,
                str::to_string,
            ),
        }
    }
}

/// Replaces `{name}` placeholders with context values.
///
/// Unknown placeholders become empty strings. Braces that do not enclose an
/// identifier (`[A-Za-z0-9_]+`) are copied through unchanged.
pub fn interpolate<F>(template: &str, context: &BTreeMap<String, String>, escape: F) -> String
where
    F: Fn(&str) -> String,
{
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];

        match after.find('}') {
            Some(end) if is_placeholder_name(&after[..end]) => {
                if let Some(value) = context.get(&after[..end]) {
                    out.push_str(&escape(value));
                }
                rest = &after[end + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Simple HTML escaping for email content
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
