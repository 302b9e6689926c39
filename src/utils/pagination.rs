use serde::Serialize;

/// Posts per listing page
pub const POSTS_PER_PAGE: i64 = 10;

/// One page of a listing, shaped for the paginator template
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub object_list: Vec<T>,
    pub number: i64,
    pub num_pages: i64,
    pub count: i64,
    pub has_previous: bool,
    pub has_next: bool,
}

/// Resolved position of a page inside a result set of `count` rows
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageWindow {
    pub number: i64,
    pub num_pages: i64,
    pub count: i64,
    pub per_page: i64,
}

impl PageWindow {
    /// Resolve the raw `?page=` value against the row count
    ///
    /// Missing or non-numeric input selects page 1. A number outside
    /// `1..=num_pages` selects the last page. An empty result still has
    /// one (empty) page.
    pub fn resolve(count: i64, per_page: i64, requested: Option<&str>) -> Self {
        let num_pages = if count <= 0 {
            1
        } else {
            (count + per_page - 1) / per_page
        };

        let number = match requested.map(str::trim).map(str::parse::<i64>) {
            None | Some(Err(_)) => 1,
            Some(Ok(n)) if n < 1 || n > num_pages => num_pages,
            Some(Ok(n)) => n,
        };

        PageWindow {
            number,
            num_pages,
            count,
            per_page,
        }
    }

    pub fn limit(&self) -> i64 {
        self.per_page
    }

    pub fn offset(&self) -> i64 {
        (self.number - 1) * self.per_page
    }

    pub fn into_page<T>(self, object_list: Vec<T>) -> Page<T> {
        Page {
            object_list,
            number: self.number,
            num_pages: self.num_pages,
            count: self.count,
            has_previous: self.number > 1,
            has_next: self.number < self.num_pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_page_by_default() {
        let window = PageWindow::resolve(25, 10, None);
        assert_eq!(window.number, 1);
        assert_eq!(window.num_pages, 3);
        assert_eq!(window.offset(), 0);
        assert_eq!(window.limit(), 10);
    }

    #[test]
    fn page_n_starts_at_ten_times_n_minus_one() {
        let window = PageWindow::resolve(25, 10, Some("3"));
        assert_eq!(window.number, 3);
        assert_eq!(window.offset(), 20);
    }

    #[test]
    fn garbage_page_falls_back_to_first() {
        assert_eq!(PageWindow::resolve(25, 10, Some("abc")).number, 1);
        assert_eq!(PageWindow::resolve(25, 10, Some("")).number, 1);
    }

    #[test]
    fn out_of_range_page_falls_back_to_last() {
        assert_eq!(PageWindow::resolve(25, 10, Some("99")).number, 3);
        assert_eq!(PageWindow::resolve(25, 10, Some("0")).number, 3);
    }

    #[test]
    fn empty_listing_has_one_page() {
        let window = PageWindow::resolve(0, 10, Some("2"));
        assert_eq!(window.number, 1);
        assert_eq!(window.num_pages, 1);

        let page = window.into_page(Vec::<i64>::new());
        assert!(!page.has_previous);
        assert!(!page.has_next);
    }

    #[test]
    fn navigation_flags() {
        let page = PageWindow::resolve(30, 10, Some("2")).into_page(vec![1, 2, 3]);
        assert!(page.has_previous);
        assert!(page.has_next);
        assert_eq!(page.object_list, vec![1, 2, 3]);
    }
}
