use shiori_core::{DayDetailTask, ItineraryDocument};

/// Shared persona for every build call. The fenced-JSON contract here
/// is what `parse_ai_response` unpicks on the other side.
pub fn system_prompt() -> &'static str {
    r#"You are an expert travel planner. You help build day-by-day travel itineraries.

When you update the itinerary, include exactly one fenced JSON block in your reply:

```json
{
  "title": "...",
  "destination": "...",
  "duration": 3,
  "schedule": [
    {
      "day": 1,
      "theme": "...",
      "spots": [
        {
          "name": "...",
          "description": "...",
          "scheduledTime": "09:00",
          "duration": 90,
          "location": {"lat": 0.0, "lng": 0.0, "address": "..."},
          "estimatedCost": 0,
          "category": "..."
        }
      ]
    }
  ]
}
```

Only include the fields you are changing. Keep any prose outside the JSON block short and friendly."#
}

/// Prompt for the one-shot skeleton call that opens a build: a rough
/// day split with themes, no spot detail yet.
pub fn skeleton_prompt(brief: &str, days: u32) -> String {
    format!(
        r#"Plan a {days}-day trip based on this request:

{brief}

Produce a skeleton itinerary: title, destination, duration, and one schedule entry per day ({days} entries) with a day theme and one or two candidate spots each (names only, no detail yet)."#
    )
}

/// Prompt for detailing a single day. The current skeleton for that day
/// is inlined so the model expands rather than reinvents it.
pub fn day_detail_prompt(task: &DayDetailTask, itinerary: Option<&ItineraryDocument>) -> String {
    let mut prompt = format!("Flesh out day {} of the itinerary in full detail.\n", task.day);

    if let Some(doc) = itinerary {
        prompt.push_str(&format!(
            "\nTrip: {} — {} ({} days)\n",
            doc.title,
            doc.destination,
            doc.total_days()
        ));
        if let Some(day) = doc.day(task.day) {
            if let Ok(json) = serde_json::to_string_pretty(day) {
                prompt.push_str("\nCurrent skeleton for this day:\n```json\n");
                prompt.push_str(&json);
                prompt.push_str("\n```\n");
            }
        }
    }

    if let Some(theme) = &task.theme {
        prompt.push_str(&format!("\nDay theme: {}\n", theme));
    }
    if let Some(info) = &task.additional_info {
        prompt.push_str(&format!("\nAdditional requests: {}\n", info));
    }

    prompt.push_str(&format!(
        "\nReply with a fenced JSON block whose schedule contains only day {}: every spot needs a description, scheduledTime, duration, location and estimatedCost. Keep existing spot ids where a spot survives.",
        task.day
    ));

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_detail_prompt_mentions_day_and_theme() {
        let task = DayDetailTask {
            day: 2,
            theme: Some("temples".to_string()),
            additional_info: None,
            priority: 2,
        };
        let prompt = day_detail_prompt(&task, None);
        assert!(prompt.contains("day 2"));
        assert!(prompt.contains("temples"));
    }

    #[test]
    fn test_skeleton_prompt_carries_brief() {
        let prompt = skeleton_prompt("Quiet food-focused Kyoto weekend", 2);
        assert!(prompt.contains("2-day"));
        assert!(prompt.contains("food-focused"));
    }
}
