mod common;

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::{json, Value};

fn new_tour(name: &str) -> Value {
    json!({
        "name": name,
        "duration": 5,
        "maxGroupSize": 25,
        "difficulty": "easy",
        "price": 397,
        "summary": "Breathtaking hike through the Canadian Banff National Park",
        "imageCover": "tour-1-cover.jpg"
    })
}

#[tokio::test]
async fn tour_writes_are_for_managers() -> Result<()> {
    let app = common::spawn_app().await?;
    let (_, user) = app.user_with_role("Plain User", "user").await?;
    let (_, lead) = app.user_with_role("Lead Guide", "lead-guide").await?;

    let res = app.post("/api/v1/tours", None, new_tour("The Forest Hiker")).await?;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);

    let res = app.post("/api/v1/tours", Some(&user), new_tour("The Forest Hiker")).await?;
    assert_eq!(res.status, StatusCode::FORBIDDEN);

    let res = app.post("/api/v1/tours", Some(&lead), new_tour("The Forest Hiker")).await?;
    assert_eq!(res.status, StatusCode::CREATED, "{}", res.body);
    let tour = &res.body["data"]["data"];
    assert_eq!(tour["slug"], "the-forest-hiker");
    assert_eq!(tour["ratingsAverage"], 4.5);
    let id = tour["id"].as_str().unwrap().to_string();

    let res = app
        .patch(&format!("/api/v1/tours/{}", id), Some(&lead), json!({ "price": 497 }))
        .await?;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["data"]["data"]["price"], 497);

    let res = app
        .patch(&format!("/api/v1/tours/{}", id), Some(&lead), json!({ "difficulty": "extreme" }))
        .await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.body["field_errors"]["difficulty"], "Difficulty is either: easy, medium, difficult");
    Ok(())
}

#[tokio::test]
async fn deleting_twice_is_not_found() -> Result<()> {
    let app = common::spawn_app().await?;
    let (_, admin) = app.user_with_role("Site Admin", "admin").await?;
    let id = app.insert_tour("The Sea Explorer", json!({})).await?;
    let uri = format!("/api/v1/tours/{}", id);

    let res = app.delete(&uri, Some(&admin)).await?;
    assert_eq!(res.status, StatusCode::NO_CONTENT);
    assert!(res.body.is_null());

    let res = app.delete(&uri, Some(&admin)).await?;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    assert_eq!(res.body["message"], "No data found with that ID");

    let res = app.get(&format!("/api/v1/tours/{}", common::random_id()), None).await?;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn reviews_require_a_booking() -> Result<()> {
    let app = common::spawn_app().await?;
    let tour = app.insert_tour("The Snow Adventurer", json!({})).await?;
    let (user_id, user) = app.signup("Laura Wilson", "laura@example.io", "pass1234").await?;
    let uri = format!("/api/v1/tours/{}/reviews", tour);

    let res = app.post(&uri, Some(&user), json!({ "review": "Loved it", "rating": 5 })).await?;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
    assert_eq!(res.body["message"], "You can only review tours you have booked");

    app.insert_booking(&tour, &user_id).await?;
    let res = app.post(&uri, Some(&user), json!({ "review": "Loved it", "rating": 5 })).await?;
    assert_eq!(res.status, StatusCode::CREATED, "{}", res.body);
    assert_eq!(res.body["data"]["data"]["tour"], tour.as_str());
    assert_eq!(res.body["data"]["data"]["user"], user_id.as_str());

    let res = app.post(&uri, Some(&user), json!({ "review": "Again!", "rating": 4 })).await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert!(res.body["message"].as_str().unwrap().starts_with("Duplicate field value"));
    Ok(())
}

#[tokio::test]
async fn reviews_are_for_users_only() -> Result<()> {
    let app = common::spawn_app().await?;
    let tour = app.insert_tour("The Wine Taster", json!({})).await?;
    let (guide_id, guide) = app.user_with_role("Tour Guide", "guide").await?;
    app.insert_booking(&tour, &guide_id).await?;

    let res = app
        .post("/api/v1/reviews", Some(&guide), json!({ "review": "Nice", "rating": 4, "tour": tour }))
        .await?;
    assert_eq!(res.status, StatusCode::FORBIDDEN);

    let res = app.get("/api/v1/reviews", None).await?;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn ratings_follow_reviews() -> Result<()> {
    let app = common::spawn_app().await?;
    let tour = app.insert_tour("The Park Camper", json!({})).await?;
    let uri = format!("/api/v1/tours/{}/reviews", tour);

    let mut review_ids = Vec::new();
    for (name, email, rating) in [("Aarav Lynn", "aarav@example.io", 5), ("Ben Hadley", "ben@example.io", 4)] {
        let (id, token) = app.signup(name, email, "pass1234").await?;
        app.insert_booking(&tour, &id).await?;
        let res = app.post(&uri, Some(&token), json!({ "review": "Great", "rating": rating })).await?;
        assert_eq!(res.status, StatusCode::CREATED, "{}", res.body);
        review_ids.push((res.body["data"]["data"]["id"].as_str().unwrap().to_string(), token));
    }

    let res = app.get(&format!("/api/v1/tours/{}", tour), None).await?;
    assert_eq!(res.body["data"]["data"]["ratingsQuantity"], 2);
    assert_eq!(res.body["data"]["data"]["ratingsAverage"], 4.5);
    let reviews = res.body["data"]["data"]["reviews"].as_array().unwrap();
    assert_eq!(reviews.len(), 2);
    assert!(reviews[0]["user"]["name"].is_string());
    assert!(reviews[0]["user"].get("password").is_none());

    let (second, token) = &review_ids[1];
    let res = app
        .patch(&format!("/api/v1/reviews/{}", second), Some(token), json!({ "rating": 2 }))
        .await?;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    let res = app.get(&format!("/api/v1/tours/{}", tour), None).await?;
    assert_eq!(res.body["data"]["data"]["ratingsAverage"], 3.5);

    let (first, token) = &review_ids[0];
    app.delete(&format!("/api/v1/reviews/{}", first), Some(token)).await?;
    app.delete(&format!("/api/v1/reviews/{}", second), Some(token)).await?;
    let res = app.get(&format!("/api/v1/tours/{}", tour), None).await?;
    assert_eq!(res.body["data"]["data"]["ratingsQuantity"], 0);
    assert_eq!(res.body["data"]["data"]["ratingsAverage"], 4.5);

    let res = app.get(&uri, Some(token)).await?;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["results"], 0);
    Ok(())
}

#[tokio::test]
async fn nested_listing_is_scoped_to_the_tour() -> Result<()> {
    let app = common::spawn_app().await?;
    let first = app.insert_tour("The Northern Lights", json!({})).await?;
    let second = app.insert_tour("The Desert Walker", json!({})).await?;
    let (user_id, token) = app.signup("Laura Wilson", "laura@example.io", "pass1234").await?;

    for tour in [&first, &second] {
        app.insert_booking(tour, &user_id).await?;
        let res = app
            .post(&format!("/api/v1/tours/{}/reviews", tour), Some(&token), json!({ "review": "Fine", "rating": 4 }))
            .await?;
        assert_eq!(res.status, StatusCode::CREATED);
    }

    let res = app.get(&format!("/api/v1/tours/{}/reviews", first), Some(&token)).await?;
    assert_eq!(res.body["results"], 1);
    assert_eq!(res.body["data"]["data"][0]["tour"], first.as_str());

    let res = app.get("/api/v1/reviews?rating=4", Some(&token)).await?;
    assert_eq!(res.body["results"], 2);
    Ok(())
}

#[tokio::test]
async fn bookings_are_for_managers() -> Result<()> {
    let app = common::spawn_app().await?;
    let tour = app.insert_tour("The Star Gazer", json!({})).await?;
    let (user_id, user) = app.user_with_role("Plain User", "user").await?;
    let (_, admin) = app.user_with_role("Site Admin", "admin").await?;

    let res = app.get("/api/v1/bookings", Some(&user)).await?;
    assert_eq!(res.status, StatusCode::FORBIDDEN);

    let res = app
        .post("/api/v1/bookings", Some(&admin), json!({ "tour": tour, "user": user_id, "price": 997 }))
        .await?;
    assert_eq!(res.status, StatusCode::CREATED, "{}", res.body);
    assert_eq!(res.body["data"]["data"]["paid"], true);

    let res = app.get("/api/v1/bookings", Some(&admin)).await?;
    assert_eq!(res.body["results"], 1);
    Ok(())
}

#[tokio::test]
async fn unknown_routes_and_bad_bodies() -> Result<()> {
    let app = common::spawn_app().await?;

    let res = app.get("/api/v1/nowhere", None).await?;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    assert_eq!(res.body["message"], "Can't find /api/v1/nowhere on this server!");
    assert_eq!(res.body["status"], "fail");

    let res = app.post("/api/v1/users/login", None, json!(["not", "an", "object"])).await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);

    let res = app.get("/health", None).await?;
    assert_eq!(res.status, StatusCode::OK);
    Ok(())
}
